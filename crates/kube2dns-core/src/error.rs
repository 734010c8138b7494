//! Error types for the kube2dns bridge
//!
//! Errors only ever travel between an adapter and the engine. The engine
//! itself never hands an error to a caller: a failing session is restarted and
//! a mutation that cannot converge ends the process.

use thiserror::Error;

/// Result type alias for kube2dns operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the kube2dns bridge
#[derive(Error, Debug)]
pub enum Error {
    /// Registry (list/watch) errors
    #[error("Registry error: {0}")]
    Registry(String),

    /// Downstream record store errors
    #[error("Record store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Key or resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Create a registry error
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a record store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error means the target did not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
