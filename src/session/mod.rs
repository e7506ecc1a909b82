//! Broker session: connection state machine, schedulers and inbound decoding

pub mod credentials;
pub mod manager;
pub mod message_handler;
pub mod scheduler;
pub mod state;

pub use credentials::{BrokerCredentials, CredentialError, CredentialProvider, DccsClient};
pub use manager::{SessionEvent, SessionManager};
pub use message_handler::{DecodeError, InboundDecoder};
pub use scheduler::{PeriodicTask, RecoveryReport};
pub use state::{SessionState, Transition};
