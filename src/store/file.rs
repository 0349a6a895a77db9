//! Immutable declarative resource store
//!
//! Loads YAML resource files from a directory at startup. Each file
//! declares `id`, `displayName`, and a body. The store rejects every
//! mutation; declarative resources change only on disk.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use super::{Resource, ResourceStore, StoreError};

/// Read-only store over declarative YAML files
pub struct FileStore {
    entries: BTreeMap<String, Resource>,
}

impl FileStore {
    /// Load every `.yaml` / `.yml` file under `dir`.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let mut entries = BTreeMap::new();

        let dir_entries = std::fs::read_dir(dir)
            .map_err(|e| StoreError::Backend(format!("cannot read {}: {e}", dir.display())))?;

        for dir_entry in dir_entries {
            let path = dir_entry
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .path();

            let is_yaml = path
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            let content = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Backend(format!("cannot read {}: {e}", path.display())))?;
            let resource: Resource = serde_yaml::from_str(&content).map_err(|e| {
                StoreError::Backend(format!("invalid resource file {}: {e}", path.display()))
            })?;

            if resource.id.is_empty() {
                return Err(StoreError::Backend(format!(
                    "resource file {} declares an empty id",
                    path.display()
                )));
            }

            if entries.insert(resource.id.clone(), resource).is_some() {
                tracing::warn!(file = %path.display(), "duplicate declarative resource id, keeping the later file");
            }
        }

        tracing::debug!(count = entries.len(), dir = %dir.display(), "loaded declarative resources");
        Ok(Self { entries })
    }

    /// An empty file store, for deployments without a declarative dir.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl ResourceStore for FileStore {
    async fn get(&self, id: &str) -> Result<Resource, StoreError> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(id))
    }

    async fn create(&self, resource: Resource) -> Result<Resource, StoreError> {
        Err(StoreError::Immutable(resource.id))
    }

    async fn update(&self, id: &str, _resource: Resource) -> Result<Resource, StoreError> {
        Err(StoreError::Immutable(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        Err(StoreError::Immutable(id.to_string()))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Resource>, StoreError> {
        Ok(self
            .entries
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.entries.values().cloned().collect())
    }

    async fn list_count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_resource(dir: &Path, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_load_and_read() {
        let dir = tempfile::tempdir().unwrap();
        write_resource(
            dir.path(),
            "dark.yaml",
            "id: theme-dark\ndisplayName: Dark\nbody:\n  color: '#000'\n",
        );
        write_resource(dir.path(), "notes.txt", "not a resource");

        let store = FileStore::load(dir.path()).unwrap();
        assert_eq!(store.list_count().await.unwrap(), 1);

        let theme = store.get("theme-dark").await.unwrap();
        assert_eq!(theme.display_name, "Dark");
        assert_eq!(theme.body["color"], "#000");
    }

    #[tokio::test]
    async fn test_mutations_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_resource(dir.path(), "a.yaml", "id: a\ndisplayName: A\n");
        let store = FileStore::load(dir.path()).unwrap();

        let resource = store.get("a").await.unwrap();
        assert!(matches!(
            store.create(resource.clone()).await,
            Err(StoreError::Immutable(_))
        ));
        assert!(matches!(
            store.update("a", resource).await,
            Err(StoreError::Immutable(_))
        ));
        assert!(matches!(
            store.delete("a").await,
            Err(StoreError::Immutable(_))
        ));
    }

    #[test]
    fn test_invalid_yaml_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write_resource(dir.path(), "bad.yaml", ": not yaml [");
        assert!(FileStore::load(dir.path()).is_err());
    }

    #[test]
    fn test_empty_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_resource(dir.path(), "noid.yaml", "id: ''\ndisplayName: X\n");
        assert!(FileStore::load(dir.path()).is_err());
    }
}
