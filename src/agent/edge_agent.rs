//! Public facade of the edge agent
//!
//! Composes the session, the offline queue, the config cache and the
//! encoders. Apart from `connect`, every operation reports its outcome as a
//! `bool`: `true` when the broker confirmed the publish, `false` when the
//! data was buffered for recovery or could not be sent.

use super::handlers::{spawn_dispatcher, EventHandlers, EVENT_CHANNEL_CAPACITY};
use crate::cache::{CacheStore, ConfigCache, JsonFileCacheStore, SharedConfigCache};
use crate::codec::{encode_tag_data, render_config};
use crate::config::{AgentConfig, ConfigError, ConnectType};
use crate::error::AgentResult;
use crate::protocol::edge::{ConfigAction, EdgeConfig, EdgeData, EdgeDeviceStatus, MessageReceived};
use crate::protocol::messages::{Envelope, StatusData};
use crate::queue::OfflineQueue;
use crate::session::{CredentialProvider, DccsClient, SessionManager, SessionState};
use crate::transport::{QoS, Transport};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct EdgeAgent<T: Transport> {
    config: AgentConfig,
    session: SessionManager<T>,
    queue: Arc<OfflineQueue>,
    cache: SharedConfigCache,
    handlers: Arc<EventHandlers>,
    dispatcher: JoinHandle<()>,
}

impl<T: Transport> EdgeAgent<T> {
    /// Build an agent with the DCCS client and cache file named by `config`
    pub async fn new(config: AgentConfig, transport: T) -> AgentResult<Self> {
        config.validate()?;
        let credentials: Option<Arc<dyn CredentialProvider>> = match config.agent.connect_type {
            ConnectType::Dccs => match config.dccs.as_ref().filter(|dccs| dccs.is_valid()) {
                Some(dccs) => Some(Arc::new(
                    DccsClient::new(dccs, config.agent.use_secure)
                        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?,
                )),
                // Reported as a config error on connect
                None => None,
            },
            ConnectType::Mqtt => None,
        };
        let store = Arc::new(JsonFileCacheStore::new(&config.storage.config_cache_path));

        Self::with_collaborators(config, Arc::new(transport), credentials, store).await
    }

    /// Build an agent around explicit collaborators
    ///
    /// `config` is validated here as well, since it may have been built in
    /// code rather than loaded from TOML.
    pub async fn with_collaborators(
        config: AgentConfig,
        transport: Arc<T>,
        credentials: Option<Arc<dyn CredentialProvider>>,
        cache_store: Arc<dyn CacheStore>,
    ) -> AgentResult<Self> {
        config.validate()?;
        let queue = Arc::new(OfflineQueue::new(&config.storage.recover_db_path));
        let cache = SharedConfigCache::load(cache_store).await;

        let handlers = Arc::new(EventHandlers::default());
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let dispatcher = spawn_dispatcher(events_rx, handlers.clone());

        let session =
            SessionManager::new(config.clone(), transport, credentials, queue.clone(), events_tx);

        info!(
            node_id = %config.agent.node_id,
            client_id = %session.client_id(),
            "Edge agent created"
        );

        Ok(Self {
            config,
            session,
            queue,
            cache,
            handlers,
            dispatcher,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub async fn config_cache(&self) -> Arc<ConfigCache> {
        self.cache.snapshot().await
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn set_on_connect(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.handlers.set_on_connect(handler);
    }

    pub fn set_on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.handlers.set_on_disconnect(handler);
    }

    pub fn set_on_message(&self, handler: impl Fn(MessageReceived) + Send + Sync + 'static) {
        self.handlers.set_on_message(handler);
    }

    pub async fn connect(&self) -> AgentResult<()> {
        self.session.connect().await
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await;
        self.queue.close().await;
    }

    /// Publish a configuration upload and apply its effect to the cache
    ///
    /// Returns `false` without publishing when not connected.
    pub async fn upload_config(&self, action: ConfigAction, config: &EdgeConfig) -> bool {
        if !self.is_connected() {
            warn!(?action, "Config upload skipped, not connected");
            return false;
        }

        let envelope = render_config(
            action,
            &self.config.agent.node_id,
            config,
            self.config.agent.heartbeat_interval_secs,
            Utc::now(),
        );
        let payload = match envelope.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode config upload");
                return false;
            }
        };

        let topic = self.session.topics().config_topic();
        if let Err(e) = self
            .session
            .publish(&topic, payload, QoS::AtLeastOnce, false)
            .await
        {
            warn!(?action, error = %e, "Config upload failed");
            return false;
        }

        self.cache.apply(action, config).await;
        info!(?action, devices = config.node.device_list.len(), "Config uploaded");
        true
    }

    /// Publish device status as a retained message on the node connection topic
    pub async fn send_device_status(&self, status: &EdgeDeviceStatus) -> bool {
        if !self.is_connected() {
            debug!("Device status skipped, not connected");
            return false;
        }

        let body = StatusData {
            devices: status
                .device_list
                .iter()
                .map(|device| (device.id.clone(), device.status as u8))
                .collect(),
        };
        let payload = match Envelope::at(status.timestamp, body).to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode device status");
                return false;
            }
        };

        let topic = self.session.topics().node_conn_topic();
        match self
            .session
            .publish(&topic, payload, QoS::AtLeastOnce, true)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Device status publish failed");
                false
            }
        }
    }

    /// Publish tag readings, buffering every payload that cannot be delivered
    ///
    /// Returns `true` only when every payload was confirmed by the broker.
    /// Zero readings publish nothing and return `true`.
    pub async fn send_data(&self, data: &EdgeData) -> bool {
        let cache = self.cache.snapshot().await;
        let payloads = match encode_tag_data(data, &cache) {
            Ok(payloads) => payloads,
            Err(e) => {
                error!(error = %e, "Failed to encode tag data");
                return false;
            }
        };

        let topic = self.session.topics().data_topic();
        let mut delivered = true;
        for payload in payloads {
            if self.is_connected() {
                match self
                    .session
                    .publish(&topic, payload.clone(), QoS::AtLeastOnce, false)
                    .await
                {
                    Ok(()) => continue,
                    Err(e) => warn!(error = %e, "Data publish failed"),
                }
            }
            delivered = false;
            self.buffer(payload).await;
        }
        delivered
    }

    async fn buffer(&self, payload: Vec<u8>) {
        if !self.config.agent.data_recover {
            debug!("Data recovery disabled, dropping payload");
            return;
        }
        let message = match String::from_utf8(payload) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Payload is not UTF-8, dropping");
                return;
            }
        };
        if let Err(e) = self.queue.enqueue(&message).await {
            error!(error = %e, "Failed to buffer payload, data dropped");
        }
    }
}

impl<T: Transport> Drop for EdgeAgent<T> {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::protocol::edge::{
        AnalogTagConfig, DeviceConfig, DeviceStatus, DeviceStatusCode, EdgeTag, NodeConfig,
    };
    use crate::testing::mocks::MockTransport;
    use serde_json::Value;
    use tempfile::TempDir;

    async fn agent(dir: &TempDir) -> (EdgeAgent<MockTransport>, Arc<MockTransport>) {
        let mut config = AgentConfig::test_config();
        config.storage.recover_db_path = dir.path().join("_recover.sqlite");
        config.storage.config_cache_path = dir.path().join("_config.json");
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(JsonFileCacheStore::new(&config.storage.config_cache_path));
        let agent = EdgeAgent::with_collaborators(config, transport.clone(), None, store)
            .await
            .unwrap();
        (agent, transport)
    }

    fn sample_config() -> EdgeConfig {
        EdgeConfig {
            node: NodeConfig::default().with_device(
                DeviceConfig::new("D1")
                    .with_analog_tag(AnalogTagConfig::new("A1").with_fraction_display_format(2)),
            ),
        }
    }

    #[tokio::test]
    async fn test_upload_config_requires_connection() {
        let dir = TempDir::new().unwrap();
        let (agent, transport) = agent(&dir).await;

        assert!(!agent.upload_config(ConfigAction::Create, &sample_config()).await);
        assert!(transport.published().await.is_empty());
        assert!(agent.config_cache().await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_config_updates_cache() {
        let dir = TempDir::new().unwrap();
        let (agent, transport) = agent(&dir).await;
        agent.connect().await.unwrap();

        assert!(agent.upload_config(ConfigAction::Create, &sample_config()).await);

        let cfg = transport.published_on("/wisepaas/scada/test-node/cfg").await;
        assert_eq!(cfg.len(), 1);
        assert!(!cfg[0].retain);
        let body: Value = serde_json::from_slice(&cfg[0].payload).unwrap();
        assert_eq!(body["d"]["Action"], 1);
        assert!(body["d"]["Scada"]["test-node"]["Device"]["D1"].is_object());
        assert_eq!(agent.config_cache().await.fraction_format("D1", "A1"), Some(2));
        assert!(dir.path().join("_config.json").exists());
    }

    #[tokio::test]
    async fn test_send_device_status() {
        let dir = TempDir::new().unwrap();
        let (agent, transport) = agent(&dir).await;
        let status = EdgeDeviceStatus::new(vec![DeviceStatus {
            id: "D1".to_string(),
            status: DeviceStatusCode::Online,
        }]);

        assert!(!agent.send_device_status(&status).await);
        agent.connect().await.unwrap();
        assert!(agent.send_device_status(&status).await);

        let conn = transport.published_on("/wisepaas/scada/test-node/conn").await;
        let last = conn.last().unwrap();
        assert!(last.retain);
        let body: Value = serde_json::from_slice(&last.payload).unwrap();
        assert_eq!(body["d"]["Dev"]["D1"], 1);
    }

    #[tokio::test]
    async fn test_send_data_rounds_with_cached_format() {
        let dir = TempDir::new().unwrap();
        let (agent, transport) = agent(&dir).await;
        agent.connect().await.unwrap();
        assert!(agent.upload_config(ConfigAction::Create, &sample_config()).await);

        let data = EdgeData::new(vec![
            EdgeTag::new("D1", "A1", 12.3456),
            EdgeTag::new("D1", "A2", 12.3456),
        ]);
        assert!(agent.send_data(&data).await);

        let published = transport.published_on("/wisepaas/scada/test-node/data").await;
        assert_eq!(published.len(), 1);
        assert!(!published[0].retain);
        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["d"]["D1"]["A1"], 12.35);
        assert_eq!(body["d"]["D1"]["A2"], 12.3456);
    }

    #[tokio::test]
    async fn test_send_data_while_disconnected_is_buffered() {
        let dir = TempDir::new().unwrap();
        let (agent, transport) = agent(&dir).await;

        let data = EdgeData::new(vec![EdgeTag::new("D1", "A1", 1.0)]);
        assert!(!agent.send_data(&data).await);

        assert!(transport.published().await.is_empty());
        assert_eq!(agent.queue().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_send_data_publish_failure_is_buffered() {
        let dir = TempDir::new().unwrap();
        let (agent, transport) = agent(&dir).await;
        agent.connect().await.unwrap();
        transport.set_fail_publish(true);

        let tags = (0..150)
            .map(|i| EdgeTag::new("D1", format!("T{i}"), i as i64))
            .collect();
        assert!(!agent.send_data(&EdgeData::new(tags)).await);
        assert_eq!(agent.queue().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_send_data_without_readings() {
        let dir = TempDir::new().unwrap();
        let (agent, transport) = agent(&dir).await;
        agent.connect().await.unwrap();

        assert!(agent.send_data(&EdgeData::new(Vec::new())).await);
        assert!(transport
            .published_on("/wisepaas/scada/test-node/data")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_recovery_disabled_drops_payload() {
        let dir = TempDir::new().unwrap();
        let mut config = AgentConfig::test_config();
        config.agent.data_recover = false;
        config.storage.recover_db_path = dir.path().join("_recover.sqlite");
        let store = Arc::new(JsonFileCacheStore::new(dir.path().join("_config.json")));
        let agent =
            EdgeAgent::with_collaborators(config, Arc::new(MockTransport::new()), None, store)
                .await
                .unwrap();

        let data = EdgeData::new(vec![EdgeTag::new("D1", "A1", 1.0)]);
        assert!(!agent.send_data(&data).await);
        assert!(!agent.queue().exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_zero_recover_interval_built_in_code() {
        let dir = TempDir::new().unwrap();
        let mut config = AgentConfig::test_config();
        config.storage.recover_interval_secs = 0;
        let store = Arc::new(JsonFileCacheStore::new(dir.path().join("_config.json")));

        let result =
            EdgeAgent::with_collaborators(config.clone(), Arc::new(MockTransport::new()), None, store)
                .await;
        assert!(matches!(
            result,
            Err(AgentError::ConfigError(ConfigError::InvalidConfig(_)))
        ));

        let result = EdgeAgent::new(config, MockTransport::new()).await;
        assert!(matches!(
            result,
            Err(AgentError::ConfigError(ConfigError::InvalidConfig(_)))
        ));
    }
}
