//! MQTT v5 transport
//!
//! Split the same way as the rest of the transport code: pure pieces are
//! kept apart from the I/O so they can be tested without a broker.
//!
//! - [`connection`] - option mapping and link state
//! - [`message_handler`] - routing of rumqttc events
//! - [`client`] - the event loop task and the [`Transport`](crate::transport::Transport) impl

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, LinkState};
pub use message_handler::{EventRoute, MessageHandler};
