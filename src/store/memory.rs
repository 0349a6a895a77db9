//! Mutable in-memory resource store
//!
//! Stands in for the SQL-backed store in single-node deployments and
//! tests; the persistence layer proper lives behind [`ResourceStore`].

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Resource, ResourceStore, StoreError};

/// DashMap-backed store with stable id ordering on list
pub struct MemoryStore {
    entries: DashMap<String, Resource>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn sorted(&self) -> Vec<Resource> {
        let mut all: Vec<Resource> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Resource, StoreError> {
        self.entries
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(id))
    }

    async fn create(&self, resource: Resource) -> Result<Resource, StoreError> {
        if self.entries.contains_key(&resource.id) {
            return Err(StoreError::Conflict(resource.id));
        }
        self.entries.insert(resource.id.clone(), resource.clone());
        Ok(resource)
    }

    async fn update(&self, id: &str, resource: Resource) -> Result<Resource, StoreError> {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                *entry.value_mut() = resource.clone();
                Ok(resource)
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Resource>, StoreError> {
        Ok(self.sorted().into_iter().skip(offset).take(limit).collect())
    }

    async fn list_all(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.sorted())
    }

    async fn list_count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }
}
