//! Mock implementations for testing
//!
//! Provides an in-memory `Transport` and `CredentialProvider` so the
//! session and the agent facade can be exercised without a broker or the
//! DCCS service.

use crate::config::Protocol;
use crate::session::credentials::{BrokerCredentials, CredentialError, CredentialProvider};
use crate::transport::{ConnectOptions, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};

/// One publish seen by [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    connect_count: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    connect_options: Mutex<Vec<ConnectOptions>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.connect_options.lock().await.last().cloned()
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
        self.subscriptions.lock().await.clear();
    }

    /// Deliver a message as if the broker had published it to us
    pub async fn inject_message(&self, topic: &str, payload: &[u8]) {
        if let Some(events) = self.events.lock().await.as_ref() {
            let _ = events
                .send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .await;
        }
    }

    /// Simulate the link dropping underneath the session
    pub async fn drop_connection(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(events) = self.events.lock().await.take() {
            let _ = events
                .send(TransportEvent::ConnectionLost(reason.to_string()))
                .await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        self.connect_options.lock().await.push(options.clone());
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "mock connect failure".to_string(),
            ));
        }
        *self.events.lock().await = Some(events);
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.events.lock().await.take();
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(
                "mock publish failure".to_string(),
            ));
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Mock credential provider handing out fixed broker credentials
#[derive(Debug)]
pub struct MockCredentialProvider {
    credentials: BrokerCredentials,
    should_fail: bool,
    fetch_count: AtomicUsize,
}

impl MockCredentialProvider {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            credentials: BrokerCredentials {
                host: host.into(),
                port,
                username: "dccs-user".to_string(),
                password: "dccs-pass".to_string(),
                protocol: Protocol::Tcp,
            },
            should_fail: false,
            fetch_count: AtomicUsize::new(0),
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new("unused", 0)
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for MockCredentialProvider {
    async fn fetch(&self) -> Result<BrokerCredentials, CredentialError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(CredentialError::Status(503));
        }
        Ok(self.credentials.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options() -> ConnectOptions {
        ConnectOptions {
            host: "localhost".to_string(),
            port: 1883,
            protocol: Protocol::Tcp,
            username: String::new(),
            password: String::new(),
            client_id: "EdgeAgent_mock".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(1),
            will: None,
        }
    }

    #[tokio::test]
    async fn test_mock_transport() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(10);

        assert!(transport
            .publish("/t", b"early".to_vec(), QoS::AtLeastOnce, false)
            .await
            .is_err());

        transport.connect(&options(), tx).await.unwrap();
        transport
            .publish("/t", b"hello".to_vec(), QoS::AtLeastOnce, true)
            .await
            .unwrap();
        let published = transport.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload_str(), "hello");
        assert!(published[0].retain);

        transport.drop_connection("gone").await;
        assert!(!transport.is_connected());
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::ConnectionLost("gone".to_string()))
        );
    }

    #[tokio::test]
    async fn test_mock_credential_provider() {
        let provider = MockCredentialProvider::new("broker", 1883);
        assert_eq!(provider.fetch().await.unwrap().host, "broker");
        assert!(MockCredentialProvider::with_failure().fetch().await.is_err());
        assert_eq!(provider.fetch_count(), 1);
    }
}
