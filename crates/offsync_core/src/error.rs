//! Error types for offsync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in cache and queue operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] offsync_storage::StorageError),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A stored record decoded but is internally inconsistent.
    #[error("corrupt record {key}: {reason}")]
    CorruptRecord {
        /// Storage key of the record.
        key: String,
        /// What was inconsistent.
        reason: String,
    },

    /// A record with this key is already queued.
    #[error("record already queued: {0}")]
    DuplicateKey(String),
}

impl CoreError {
    /// Creates a corrupt-record error.
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error originates in the storage backend.
    pub fn is_storage(&self) -> bool {
        matches!(self, CoreError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_storage::StorageError;

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = StorageError::ReadOnly.into();
        assert!(err.is_storage());
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn corrupt_display() {
        let err = CoreError::corrupt("dataset", "count 3 != 2 items");
        assert!(!err.is_storage());
        assert!(err.to_string().contains("dataset"));
        assert!(err.to_string().contains("count 3"));
    }
}
