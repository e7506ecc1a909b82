//! Edge Agent - reliable edge-to-cloud telemetry over MQTT
//!
//! Keeps a persistent session with a SCADA broker, buffers telemetry that
//! cannot be delivered in a durable SQLite queue, and formats tag values
//! according to the last configuration uploaded to the cloud.
//!
//! # Overview
//!
//! - [`agent::EdgeAgent`] - connect, disconnect, upload config, send data and status
//! - [`session`] - connection state machine, reconnect, heartbeat and recovery
//! - [`queue::OfflineQueue`] - crash-safe FIFO of undelivered payloads
//! - [`codec`] - tag batching, rounding and config payload rendering
//! - [`cache`] - per-tag display format cache
//! - [`transport`] - broker transport trait and the rumqttc implementation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use edge_agent::{AgentConfig, EdgeAgent, EdgeData, EdgeTag, MqttTransport};
//!
//! # tokio_test::block_on(async {
//! let config = AgentConfig::load_from_file(std::path::Path::new("agent.toml"))?;
//! let agent = EdgeAgent::new(config, MqttTransport::new()).await?;
//! agent.set_on_message(|message| println!("received {message:?}"));
//! agent.connect().await?;
//!
//! let data = EdgeData::new(vec![EdgeTag::new("Device1", "Temperature", 21.5)]);
//! if !agent.send_data(&data).await {
//!     // Buffered, the recovery task will resend it
//! }
//! agent.disconnect().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod agent;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod testing;
pub mod transport;

pub use agent::EdgeAgent;
pub use config::*;
pub use error::{AgentError, AgentResult, StorageError};
pub use protocol::*;
pub use queue::OfflineQueue;
pub use session::{SessionEvent, SessionManager, SessionState};
pub use transport::{MqttTransport, Transport};
