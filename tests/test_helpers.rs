//! Test helpers and utilities for integration tests

use edge_agent::cache::JsonFileCacheStore;
use edge_agent::config::AgentConfig;
use edge_agent::testing::MockTransport;
use edge_agent::EdgeAgent;
use std::sync::Arc;
use tempfile::TempDir;

/// Create a test configuration whose durable files live in `dir`
#[allow(dead_code)]
pub fn test_config(dir: &TempDir) -> AgentConfig {
    let mut config = AgentConfig::from_toml_str(
        r#"
[agent]
node_id = "node-1"
connect_type = "mqtt"
heartbeat_interval_secs = 0
reconnect_interval_secs = 0

[mqtt]
host_name = "localhost"
port = 1883

[storage]
recover_interval_secs = 1
recover_batch_size = 10
"#,
    )
    .expect("Test config should parse");
    config.storage.recover_db_path = dir.path().join("_recover.sqlite");
    config.storage.config_cache_path = dir.path().join("_config.json");
    config
}

/// Build an agent over a mock transport
#[allow(dead_code)]
pub async fn test_agent(config: AgentConfig) -> (EdgeAgent<MockTransport>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(JsonFileCacheStore::new(&config.storage.config_cache_path));
    let agent = EdgeAgent::with_collaborators(config, transport.clone(), None, store)
        .await
        .expect("Test config should be valid");
    (agent, transport)
}
