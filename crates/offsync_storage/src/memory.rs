//! In-memory key-value store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_name, KvStore};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

type Partition = BTreeMap<String, Vec<u8>>;

/// An in-memory key-value store.
///
/// This store keeps all partitions in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use offsync_storage::{KvStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.set("reference-cache", "dataset", b"v1").unwrap();
/// assert!(store.contains("reference-cache", "dataset").unwrap());
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    partitions: RwLock<HashMap<String, Partition>>,
    writable: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            writable: AtomicBool::new(true),
        }
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent mutation fail with [`StorageError::ReadOnly`].
    ///
    /// Useful for testing quota-exhaustion fallbacks.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Returns the number of keys in a partition.
    #[must_use]
    pub fn entry_count(&self, partition: &str) -> usize {
        self.partitions
            .read()
            .get(partition)
            .map_or(0, BTreeMap::len)
    }

    /// Removes every partition.
    pub fn clear(&self) {
        self.partitions.write().clear();
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::ReadOnly)
        }
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, partition: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(partition)?;
        validate_name(key)?;
        Ok(self
            .partitions
            .read()
            .get(partition)
            .and_then(|p| p.get(key))
            .cloned())
    }

    fn set(&self, partition: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_name(partition)?;
        validate_name(key)?;
        self.check_writable()?;
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, partition: &str, key: &str) -> StorageResult<()> {
        validate_name(partition)?;
        validate_name(key)?;
        self.check_writable()?;
        if let Some(p) = self.partitions.write().get_mut(partition) {
            p.remove(key);
        }
        Ok(())
    }

    fn keys(&self, partition: &str) -> StorageResult<Vec<String>> {
        validate_name(partition)?;
        Ok(self
            .partitions
            .read()
            .get(partition)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }
}
