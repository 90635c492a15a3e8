//! Test fixtures and store helpers.
//!
//! Provides temporary stores and sample data shaped like what an
//! offline-first quiz client caches and queues.

use offsync_storage::{FileStore, InMemoryStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A file store in a temporary directory, removed on drop.
pub struct TempStore {
    store: Arc<FileStore>,
    temp_dir: TempDir,
}

impl TempStore {
    /// Creates an empty store in a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            temp_dir,
        }
    }

    /// Returns a shared handle to the store.
    pub fn store(&self) -> Arc<FileStore> {
        Arc::clone(&self.store)
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Closes the store and opens the same directory again, as a restarted
    /// process would.
    ///
    /// # Panics
    ///
    /// Panics if a handle returned by [`TempStore::store`] is still alive,
    /// since it keeps the directory lock.
    pub fn reopen(self) -> Self {
        let Self { store, temp_dir } = self;
        assert_eq!(
            Arc::strong_count(&store),
            1,
            "drop every store handle before reopening"
        );
        drop(store);

        let store = FileStore::open(temp_dir.path()).expect("Failed to reopen file store");
        Self {
            store: Arc::new(store),
            temp_dir,
        }
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` with a fresh temporary file store.
///
/// # Example
///
/// ```rust
/// use offsync_storage::KvStore;
/// use offsync_testkit::with_temp_store;
///
/// with_temp_store(|store| {
///     store.set("p", "k", b"v").unwrap();
///     assert!(store.contains("p", "k").unwrap());
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(Arc<FileStore>) -> R,
{
    let temp = TempStore::new();
    f(temp.store())
}

/// Creates a shared in-memory store.
pub fn memory_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

/// A queued write payload: one finished quiz attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleResult {
    /// Stable user id handed over by the identity layer.
    pub user_id: String,
    /// Which test was taken.
    pub test_id: String,
    /// Correct answers.
    pub score: u32,
    /// Questions asked.
    pub total: u32,
    /// Selected answer index per question.
    pub answers: Vec<u8>,
    /// Completion time (unix millis).
    pub completed_at: u64,
}

/// A cached reference item: one quiz question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleQuestion {
    /// Question id.
    pub id: u32,
    /// Question text.
    pub prompt: String,
    /// Answer choices.
    pub choices: Vec<String>,
    /// Index of the correct choice.
    pub correct: u8,
}

/// Builds a deterministic result; `n` varies every field.
pub fn sample_result(n: u32) -> SampleResult {
    let total = 20;
    SampleResult {
        user_id: format!("user-{}", n % 7),
        test_id: format!("practice-{n}"),
        score: n % (total + 1),
        total,
        answers: (0..total).map(|i| ((i + n) % 4) as u8).collect(),
        completed_at: 1_700_000_000_000 + u64::from(n) * 60_000,
    }
}

/// Builds `count` deterministic questions.
pub fn sample_questions(count: u32) -> Vec<SampleQuestion> {
    (0..count)
        .map(|id| SampleQuestion {
            id,
            prompt: format!("Question {id}"),
            choices: (0..4).map(|c| format!("choice {c}")).collect(),
            correct: (id % 4) as u8,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{LocalCache, PendingWriteQueue};
    use offsync_storage::KvStore;

    #[test]
    fn temp_store_reopens_with_data() {
        let temp = TempStore::new();
        temp.store().set("p", "k", b"v").unwrap();

        let temp = temp.reopen();
        assert_eq!(temp.store().get("p", "k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    #[should_panic(expected = "drop every store handle")]
    fn reopen_with_live_handle_panics() {
        let temp = TempStore::new();
        let _held = temp.store();
        let _ = temp.reopen();
    }

    #[test]
    fn samples_are_deterministic() {
        assert_eq!(sample_result(3), sample_result(3));
        assert_ne!(sample_result(3), sample_result(4));
        assert_eq!(sample_questions(5).len(), 5);
    }

    #[test]
    fn samples_fit_the_core_types() {
        let store = memory_store();
        let cache = LocalCache::new(Arc::clone(&store));
        cache.store(&sample_questions(3)).unwrap();
        assert_eq!(cache.load().unwrap().items, sample_questions(3));

        let queue = PendingWriteQueue::open(store).unwrap();
        queue.enqueue(sample_result(1)).unwrap();
        assert_eq!(queue.list_pending().unwrap()[0].payload, sample_result(1));
    }
}
