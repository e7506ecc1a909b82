//! Error taxonomy for the edge agent
//!
//! Only `ConfigError` and `ConnectionError` ever reach a caller, and only
//! through `connect()`. Storage and decode failures are handled where they
//! happen (logged, then the data path carries on) and the public facade
//! reports delivery through boolean results instead.

use crate::session::credentials::CredentialError;
use crate::session::message_handler::DecodeError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for edge agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Connection error: {0}")]
    ConnectionError(#[from] TransportError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),
}

impl From<CredentialError> for AgentError {
    fn from(error: CredentialError) -> Self {
        AgentError::ConnectionError(TransportError::Credentials(error.to_string()))
    }
}

impl AgentError {
    /// Errors the caller has to fix before retrying
    pub fn is_fatal_for_attempt(&self) -> bool {
        matches!(self, AgentError::ConfigError(_))
    }
}

/// Failures of the local durable files (offline queue, config cache)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
