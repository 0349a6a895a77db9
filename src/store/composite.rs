//! Composite store overlaying declarative files on the mutable database
//!
//! Reads prefer the file store; writes go to the database, except that
//! ids present in the file store are immutable. Both delegates are
//! injected explicitly and know nothing about the composite.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Resource, ResourceStore, StoreError};

/// File-over-database overlay store
pub struct CompositeStore {
    file: Arc<dyn ResourceStore>,
    db: Arc<dyn ResourceStore>,
    max_records: usize,
}

impl CompositeStore {
    pub fn new(file: Arc<dyn ResourceStore>, db: Arc<dyn ResourceStore>, max_records: usize) -> Self {
        Self {
            file,
            db,
            max_records,
        }
    }

    /// True iff the id originates from a declarative file.
    pub async fn is_declarative(&self, id: &str) -> Result<bool, StoreError> {
        self.file.exists(id).await
    }

    /// Full lists from both delegates, deduplicated with file precedence
    /// and ordered by id.
    async fn merged(&self) -> Result<Vec<Resource>, StoreError> {
        let file_resources = self.file.list_all().await?;
        let db_resources = self.db.list_all().await?;

        let file_ids: HashSet<&str> = file_resources.iter().map(|r| r.id.as_str()).collect();

        let mut merged = file_resources.clone();
        merged.extend(
            db_resources
                .into_iter()
                .filter(|r| !file_ids.contains(r.id.as_str())),
        );

        if merged.len() > self.max_records {
            return Err(StoreError::LimitExceeded {
                count: merged.len(),
                max: self.max_records,
            });
        }

        merged.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(merged)
    }
}

#[async_trait]
impl ResourceStore for CompositeStore {
    /// Declarative precedence: the file copy wins over a same-id DB row.
    async fn get(&self, id: &str) -> Result<Resource, StoreError> {
        match self.file.get(id).await {
            Ok(resource) => Ok(resource),
            Err(StoreError::NotFound(_)) => self.db.get(id).await,
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        if self.db.exists(id).await? {
            return Ok(true);
        }
        self.file.exists(id).await
    }

    async fn create(&self, resource: Resource) -> Result<Resource, StoreError> {
        self.db.create(resource).await
    }

    async fn update(&self, id: &str, resource: Resource) -> Result<Resource, StoreError> {
        if self.file.exists(id).await? {
            return Err(StoreError::Immutable(id.to_string()));
        }
        self.db.update(id, resource).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.file.exists(id).await? {
            return Err(StoreError::Immutable(id.to_string()));
        }
        self.db.delete(id).await
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Resource>, StoreError> {
        Ok(self
            .merged()
            .await?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Resource>, StoreError> {
        self.merged().await
    }

    /// Sums both delegates without deduplication; an id present in both
    /// stores is counted twice. Duplicates are rare enough that the
    /// over-count is preferred over loading both lists just to count.
    async fn list_count(&self) -> Result<usize, StoreError> {
        Ok(self.file.list_count().await? + self.db.list_count().await?)
    }
}
