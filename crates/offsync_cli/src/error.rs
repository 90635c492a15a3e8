//! CLI error type.

use offsync_core::CoreError;
use offsync_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command needs `--path`.
    #[error("store path required for {0}")]
    MissingPath(&'static str),

    /// Nothing has ever been stored at the given path.
    #[error("no store found at {}", .0.display())]
    NoStore(PathBuf),

    /// No record with the given key exists.
    #[error("no {kind} with key {key}")]
    NotFound {
        /// Which partition was searched.
        kind: &'static str,
        /// The requested key.
        key: String,
    },

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Queue or cache error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON output failed.
    #[error("json output failed: {0}")]
    Json(#[from] serde_json::Error),
}
