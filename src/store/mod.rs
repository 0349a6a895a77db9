//! Resource storage contracts and built-in store implementations
//!
//! Admin resources (themes, user schemas, IdP configs, ...) can originate
//! from immutable declarative files or from the mutable database. The SQL
//! layer itself is an external collaborator behind [`ResourceStore`]; this
//! crate ships a file store, an in-memory store, and the composite overlay
//! that merges the two.

pub mod composite;
pub mod file;
pub mod memory;

pub use composite::CompositeStore;
pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stored admin resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,

    #[serde(default)]
    pub display_name: String,

    /// Owning organization unit; absent for resources that are not
    /// OU-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ou_id: Option<String>,

    /// Type-specific payload
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Error type produced by [`ResourceStore`] implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Resource '{0}' not found")]
    NotFound(String),

    #[error("Resource '{0}' already exists")]
    Conflict(String),

    #[error("Resource '{0}' is declarative and cannot be mutated")]
    Immutable(String),

    #[error("Combined record count {count} exceeds the composite limit {max}")]
    LimitExceeded { count: usize, max: usize },

    #[error("Store backend failure: {0}")]
    Backend(String),
}

/// Storage contract implemented by every backing store
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Resource, StoreError>;

    async fn exists(&self, id: &str) -> Result<bool, StoreError>;

    async fn create(&self, resource: Resource) -> Result<Resource, StoreError>;

    async fn update(&self, id: &str, resource: Resource) -> Result<Resource, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Page of resources ordered by id
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Resource>, StoreError>;

    /// Every resource, ordered by id
    async fn list_all(&self) -> Result<Vec<Resource>, StoreError>;

    async fn list_count(&self) -> Result<usize, StoreError>;
}
