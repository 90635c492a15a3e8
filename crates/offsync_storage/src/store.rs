//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};
use std::sync::Arc;

/// Maximum length in bytes of a partition or key name.
pub const MAX_NAME_LEN: usize = 128;

/// A partitioned key-value store.
///
/// Stores are **opaque byte maps**. Callers own all value interpretation;
/// the store only guarantees per-key atomicity and durability.
///
/// # Invariants
///
/// - `set` replaces the whole value atomically
/// - `get` after a successful `set` returns exactly the stored bytes
/// - `delete` of a missing key succeeds
/// - `keys` returns names in ascending byte order; a partition that was never
///   written is empty
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KvStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is invalid or an I/O error occurs.
    fn get(&self, partition: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// After this returns successfully the value survives process
    /// termination (for persistent stores).
    ///
    /// # Errors
    ///
    /// Returns an error if a name is invalid, the store is read-only,
    /// or an I/O error occurs.
    fn set(&self, partition: &str, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Deletes `key`. Deleting a key that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is invalid, the store is read-only,
    /// or an I/O error occurs.
    fn delete(&self, partition: &str, key: &str) -> StorageResult<()>;

    /// Lists all keys of a partition in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition name is invalid or an I/O error occurs.
    fn keys(&self, partition: &str) -> StorageResult<Vec<String>>;

    /// Returns true if `key` exists in the partition.
    ///
    /// # Errors
    ///
    /// Same as [`KvStore::get`].
    fn contains(&self, partition: &str, key: &str) -> StorageResult<bool> {
        Ok(self.get(partition, key)?.is_some())
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get(&self, partition: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(partition, key)
    }

    fn set(&self, partition: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).set(partition, key, value)
    }

    fn delete(&self, partition: &str, key: &str) -> StorageResult<()> {
        (**self).delete(partition, key)
    }

    fn keys(&self, partition: &str) -> StorageResult<Vec<String>> {
        (**self).keys(partition)
    }

    fn contains(&self, partition: &str, key: &str) -> StorageResult<bool> {
        (**self).contains(partition, key)
    }
}

/// Checks that a partition or key name is usable by every backend.
///
/// Names must be non-empty, at most [`MAX_NAME_LEN`] bytes, consist of ASCII
/// alphanumerics, `-`, `_` or `.`, and must not start with `.` (hidden names
/// are reserved for backend temp files).
///
/// # Errors
///
/// Returns [`StorageError::InvalidName`] describing the first violation.
pub fn validate_name(name: &str) -> StorageResult<()> {
    let reject = |reason| {
        Err(StorageError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("name is empty");
    }
    if name.len() > MAX_NAME_LEN {
        return reject("name is too long");
    }
    if name.starts_with('.') {
        return reject("name must not start with '.'");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return reject("name contains unsupported characters");
    }
    Ok(())
}
