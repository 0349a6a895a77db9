//! Organization-unit hierarchy resolution
//!
//! Organization units form a forest: every unit has at most one parent and
//! an ancestor chain terminating at a root. The resolver answers the two
//! queries policy evaluation needs: ancestor-or-self tests and full
//! ancestor chains.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A node in the tenant hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationUnit {
    pub id: String,
    pub handle: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Hierarchy queries used by the authorization policies
pub trait OuHierarchyResolver: Send + Sync {
    /// True when `ancestor` is `descendant` itself or appears on the
    /// descendant's chain up to its root.
    fn is_ancestor_or_self(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// The node itself plus all ancestors up to its root, nearest first.
    fn ancestor_ids(&self, node: &str) -> Result<Vec<String>>;
}

/// In-memory resolver over a unit table
pub struct OuTreeResolver {
    units: DashMap<String, OrganizationUnit>,
}

impl OuTreeResolver {
    pub fn new() -> Self {
        Self {
            units: DashMap::new(),
        }
    }

    pub fn insert(&self, unit: OrganizationUnit) {
        self.units.insert(unit.id.clone(), unit);
    }

    pub fn remove(&self, id: &str) -> Option<OrganizationUnit> {
        self.units.remove(id).map(|(_, unit)| unit)
    }

    pub fn get(&self, id: &str) -> Option<OrganizationUnit> {
        self.units.get(id).map(|unit| unit.value().clone())
    }

    /// Every unit, ordered by id.
    pub fn all(&self) -> Vec<OrganizationUnit> {
        let mut units: Vec<OrganizationUnit> =
            self.units.iter().map(|unit| unit.value().clone()).collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        units
    }

    fn parent_of(&self, id: &str) -> Result<Option<String>> {
        match self.units.get(id) {
            Some(unit) => Ok(unit.parent_id.clone()),
            None => Err(Error::NotFound(format!("organization unit '{id}'"))),
        }
    }
}

impl Default for OuTreeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl OuHierarchyResolver for OuTreeResolver {
    fn is_ancestor_or_self(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        Ok(self.ancestor_ids(descendant)?.iter().any(|id| id == ancestor))
    }

    fn ancestor_ids(&self, node: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = node.to_string();

        loop {
            if !seen.insert(current.clone()) {
                return Err(Error::Internal(format!(
                    "organization unit hierarchy contains a cycle at '{current}'"
                )));
            }
            chain.push(current.clone());

            match self.parent_of(&current)? {
                Some(parent) => current = parent,
                None => return Ok(chain),
            }
        }
    }
}
