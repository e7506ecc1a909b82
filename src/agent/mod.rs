//! Edge agent facade and handler dispatch

pub mod edge_agent;
pub mod handlers;

pub use edge_agent::EdgeAgent;
pub use handlers::{EventHandlers, EVENT_CHANNEL_CAPACITY};
