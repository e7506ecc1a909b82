//! Config cache shared between config uploads and the data batcher
//!
//! Readers take a snapshot `Arc` and never observe a half-applied upload;
//! writers clone the current cache, mutate the clone, then swap it in.

pub mod config_cache;
pub mod store;

pub use config_cache::{ConfigCache, TagProperties};
pub use store::{CacheStore, JsonFileCacheStore};

use crate::protocol::edge::{ConfigAction, EdgeConfig};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct SharedConfigCache {
    current: RwLock<Arc<ConfigCache>>,
    store: Arc<dyn CacheStore>,
}

impl SharedConfigCache {
    /// Load the persisted cache, starting empty when it is absent or unreadable
    pub async fn load(store: Arc<dyn CacheStore>) -> Self {
        let cache = match store.load().await {
            Ok(Some(cache)) => {
                info!(tags = cache.tag_count(), "Restored config cache");
                cache
            }
            Ok(None) => ConfigCache::default(),
            Err(e) => {
                warn!(error = %e, "Config cache unreadable, starting empty");
                ConfigCache::default()
            }
        };
        Self {
            current: RwLock::new(Arc::new(cache)),
            store,
        }
    }

    pub async fn snapshot(&self) -> Arc<ConfigCache> {
        self.current.read().await.clone()
    }

    /// Apply an upload's cache effect and persist the result
    pub async fn apply(&self, action: ConfigAction, config: &EdgeConfig) {
        let mut current = self.current.write().await;
        let mut next = ConfigCache::clone(&current);
        next.apply(action, config);
        let next = Arc::new(next);
        *current = next.clone();

        if let Err(e) = self.store.save(&next).await {
            warn!(error = %e, "Failed to save config cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::edge::{AnalogTagConfig, DeviceConfig, NodeConfig};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshot_is_unaffected_by_later_writes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonFileCacheStore::new(dir.path().join("_config.json")));
        let shared = SharedConfigCache::load(store.clone()).await;

        let before = shared.snapshot().await;
        let config = EdgeConfig {
            node: NodeConfig::default().with_device(
                DeviceConfig::new("D1")
                    .with_analog_tag(AnalogTagConfig::new("A1").with_fraction_display_format(1)),
            ),
        };
        shared.apply(ConfigAction::Create, &config).await;

        assert!(before.is_empty());
        assert_eq!(shared.snapshot().await.fraction_format("D1", "A1"), Some(1));

        // Persisted and picked up by the next agent
        let reloaded = SharedConfigCache::load(store).await;
        assert_eq!(reloaded.snapshot().await.fraction_format("D1", "A1"), Some(1));
    }
}
