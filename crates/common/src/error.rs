//! Error types for shotline

use thiserror::Error;

/// Result type alias using the shotline Error
pub type Result<T> = std::result::Result<T, Error>;

/// Shotline error types shared across crates
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed or empty job configuration. Fatal before any browser work starts.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}
