//! Muninn error types

use std::time::Duration;

/// Muninn error types
#[derive(Debug, thiserror::Error)]
pub enum MuninnError {
    // Engine/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    // Storage errors
    /// The backing store rejected or failed a read/write.
    ///
    /// Fatal for event persistence; absorbed by every cache operation.
    #[error("storage error: {0}")]
    Storage(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Delivery queue errors
    #[error("forward queue is closed")]
    QueueClosed,

    #[error("forward queue is full")]
    QueueFull,
}

impl MuninnError {
    /// Whether a retry of the same request could plausibly succeed.
    ///
    /// Network failures, timeouts, rate limiting and server-side errors are
    /// transient. Client errors, storage and input errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            MuninnError::Http(_) | MuninnError::Timeout(_) => true,
            MuninnError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Shorthand for building a [`MuninnError::Storage`] from any displayable error.
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        MuninnError::Storage(err.to_string())
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
