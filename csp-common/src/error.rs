//! Common error types for CSP services
//!
//! The first group of variants is the lifecycle/report error taxonomy shared by
//! both services. The second group wraps lower-level failures.

use thiserror::Error;

/// Common result type for CSP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across CSP services
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input (unknown survey id, malformed key segment, bad window string).
    /// Surfaced immediately, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Object store put/get/list failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Conditional write lost against a concurrent writer
    #[error("Conflict on {key}: object changed since it was read")]
    Conflict { key: String },

    /// Requested record or object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote call failed before a response could be interpreted
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation abandoned through a cancellation token; partial results were discarded
    #[error("Operation cancelled")]
    Cancelled,

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors a caller may retry after re-reading state
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}
