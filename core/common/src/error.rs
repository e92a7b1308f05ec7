//! Common error types for kanisync.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for kanisync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The ledger or the writer could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A page fetch failed for reasons other than "no content".
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote throttled the request. `retry_after` is the wait the
    /// server asked for, when it sent one.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The remote deliberately reported nothing new.
    #[error("No content")]
    NoContent,

    /// A batch write failed and its transaction was aborted.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// The remote rejected our credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The sync attempt was cancelled between pages.
    #[error("Cancelled")]
    Cancelled,

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether a single request that failed with this error may be retried
    /// by the transport layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::RateLimited { .. })
    }

    /// Server-requested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
