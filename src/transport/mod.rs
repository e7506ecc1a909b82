//! Transport layer for broker communication
//!
//! The session talks to the broker only through the [`Transport`] trait so
//! the reliability logic can be exercised against an in-memory mock. The
//! production implementation lives in [`mqtt`].

use crate::config::Protocol;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::MqttTransport;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Message the broker publishes for us after an unclean disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Everything needed for one connection attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Upper bound on waiting for the broker's ConnAck
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a publish acknowledgement
    pub publish_timeout: Duration,
    pub will: Option<WillMessage>,
}

/// Asynchronous notifications from a connected transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Publish received on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// The link dropped without `disconnect()` being called. Sent at most
    /// once per successful `connect()`.
    ConnectionLost(String),
}

/// Transport failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Timed out waiting for the broker")]
    Timeout,
    #[error("Credential refresh failed: {0}")]
    Credentials(String),
}

/// Transport trait for broker communication
///
/// Implementations never reconnect on their own: after a loss they report
/// [`TransportEvent::ConnectionLost`] and wait for the next `connect()`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect and return once the broker has accepted the session.
    /// Inbound messages and loss notifications go to `events`.
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError>;

    /// Close the session cleanly; no `ConnectionLost` is reported for it
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Publish and, for QoS 1 and 2, wait for the broker's acknowledgement
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
