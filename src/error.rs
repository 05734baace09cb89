//! Error types for Conclave
//!
//! This module defines the error surface of the membership pipeline. Errors
//! are grouped by how a caller should react: `LimitExceeded` is retryable
//! after backoff, `Forbidden` is not retryable without changing the request,
//! and the federation variants are retryable only after re-checking local
//! state, since a remote join may have partially succeeded.

use std::time::Duration;

use thiserror::Error;

/// Conclave error types
#[derive(Debug, Error)]
pub enum Error {
    /// A rate limit denied the request. `retry_after` is an earliest-retry
    /// hint, absent for policies that never refill.
    #[error("Rate limit exceeded for policy {policy}")]
    LimitExceeded {
        policy: String,
        retry_after: Option<Duration>,
    },

    /// Illegal membership transition or insufficient authorization
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No remote server could be reached before any accepted the request
    #[error("Remote server unreachable: {0}")]
    RemoteUnreachable(String),

    /// A remote server understood the request and refused it
    #[error("Remote server rejected the request: {0}")]
    RemoteRejected(String),

    /// The event store did not acknowledge a write
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for Conclave operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Shorthand for a `Forbidden` error with a static reason
    pub fn forbidden(reason: &str) -> Self {
        Error::Forbidden(reason.to_owned())
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LimitExceeded { .. }
                | Error::RemoteUnreachable(_)
                | Error::RemoteRejected(_)
        )
    }
}
