//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while delivering writes.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the write can be retried.
        retryable: bool,
    },

    /// The remote endpoint refused the write for good (validation, auth).
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The remote endpoint did not answer within the request timeout.
    #[error("operation timed out")]
    Timeout,

    /// The endpoint is known to be unreachable.
    #[error("not connected to server")]
    NotConnected,

    /// Local queue or storage error.
    #[error("queue error: {0}")]
    Queue(#[from] offsync_core::CoreError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Connection drops, timeouts and an unreachable endpoint are transient.
    /// Rejections, fatal transport errors and local failures are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected => true,
            SyncError::Rejected(_) | SyncError::Queue(_) => false,
        }
    }
}
