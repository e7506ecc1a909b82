//! Persistence of the config cache

use super::ConfigCache;
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads the cache once at startup and saves it after every mutation
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet
    async fn load(&self) -> Result<Option<ConfigCache>, StorageError>;

    async fn save(&self, cache: &ConfigCache) -> Result<(), StorageError>;
}

/// Pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonFileCacheStore {
    path: PathBuf,
}

impl JsonFileCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CacheStore for JsonFileCacheStore {
    async fn load(&self) -> Result<Option<ConfigCache>, StorageError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cache = serde_json::from_slice(&content)?;
        debug!(path = %self.path.display(), "Loaded config cache");
        Ok(Some(cache))
    }

    async fn save(&self, cache: &ConfigCache) -> Result<(), StorageError> {
        let content = serde_json::to_vec_pretty(cache)?;
        tokio::fs::write(&self.path, content).await?;
        debug!(path = %self.path.display(), "Saved config cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::edge::{AnalogTagConfig, DeviceConfig, EdgeConfig, NodeConfig};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(dir.path().join("_config.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(dir.path().join("_config.json"));
        let cache = ConfigCache::from_config(&EdgeConfig {
            node: NodeConfig::default().with_device(
                DeviceConfig::new("D1")
                    .with_analog_tag(AnalogTagConfig::new("A1").with_fraction_display_format(2)),
            ),
        });

        store.save(&cache).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, cache);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("_config.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileCacheStore::new(path);
        assert!(matches!(
            store.load().await,
            Err(StorageError::Serialization(_))
        ));
    }
}
