//! Remote write endpoint abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use offsync_core::RecordKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// The remote authority that accepts queued writes.
///
/// `key` is the idempotency key of the write: the same record may be
/// delivered more than once (after a crash between acknowledgment and local
/// removal) and always carries the same key when it is.
///
/// Implementations classify failures through [`SyncError::is_retryable`]:
/// connection problems should be [`SyncError::transport_retryable`], a
/// definitive refusal [`SyncError::Rejected`].
#[async_trait]
pub trait RemoteEndpoint<P: Send + Sync>: Send + Sync {
    /// Delivers one write. `Ok` means the remote side has persisted it.
    async fn write(&self, key: &RecordKey, payload: &P) -> SyncResult<()>;
}

/// Failure a [`MockEndpoint`] can be scripted to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Retryable transport error.
    Transient,
    /// Permanent rejection.
    Permanent,
    /// Never answers.
    Hang,
}

#[derive(Debug, Clone, Copy)]
enum Script {
    Times(MockFailure, u32),
    Always(MockFailure),
}

/// One call made against a [`MockEndpoint`].
#[derive(Debug, Clone)]
pub struct MockAttempt {
    /// Key the write was made with.
    pub key: RecordKey,
    /// When the call started (tokio clock).
    pub at: Instant,
    /// Whether the call succeeded.
    pub succeeded: bool,
}

/// Scriptable in-memory endpoint for tests.
pub struct MockEndpoint<P> {
    connected: AtomicBool,
    delay: Mutex<Option<Duration>>,
    scripts: Mutex<HashMap<RecordKey, Script>>,
    attempts: Mutex<Vec<MockAttempt>>,
    accepted: Mutex<Vec<(RecordKey, P)>>,
}

impl<P: Clone> MockEndpoint<P> {
    /// Creates a connected endpoint that accepts every write.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            delay: Mutex::new(None),
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// Sets whether writes reach the endpoint. Disconnected writes fail with
    /// [`SyncError::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Adds a delay to every write.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Makes the next `times` writes of `key` fail.
    pub fn fail_times(&self, key: &RecordKey, failure: MockFailure, times: u32) {
        if times == 0 {
            self.heal(key);
            return;
        }
        self.scripts
            .lock()
            .insert(key.clone(), Script::Times(failure, times));
    }

    /// Makes every write of `key` fail.
    pub fn fail_always(&self, key: &RecordKey, failure: MockFailure) {
        self.scripts
            .lock()
            .insert(key.clone(), Script::Always(failure));
    }

    /// Removes any failure script for `key`.
    pub fn heal(&self, key: &RecordKey) {
        self.scripts.lock().remove(key);
    }

    /// Accepted writes in delivery order.
    pub fn accepted(&self) -> Vec<(RecordKey, P)> {
        self.accepted.lock().clone()
    }

    /// Keys of accepted writes in delivery order.
    pub fn accepted_keys(&self) -> Vec<RecordKey> {
        self.accepted.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Every call that returned, successful or not. Hung calls are absent.
    pub fn attempts(&self) -> Vec<MockAttempt> {
        self.attempts.lock().clone()
    }

    /// Number of calls made for `key`.
    pub fn attempts_for(&self, key: &RecordKey) -> usize {
        self.attempts.lock().iter().filter(|a| &a.key == key).count()
    }

    fn next_failure(&self, key: &RecordKey) -> Option<MockFailure> {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(key) {
            Some(Script::Always(failure)) => Some(*failure),
            Some(Script::Times(failure, remaining)) => {
                let failure = *failure;
                *remaining -= 1;
                if *remaining == 0 {
                    scripts.remove(key);
                }
                Some(failure)
            }
            None => None,
        }
    }
}

impl<P: Clone> Default for MockEndpoint<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: Clone + Send + Sync> RemoteEndpoint<P> for MockEndpoint<P> {
    async fn write(&self, key: &RecordKey, payload: &P) -> SyncResult<()> {
        let at = Instant::now();
        let connected = self.connected.load(Ordering::SeqCst);
        let failure = if connected {
            self.next_failure(key)
        } else {
            None
        };

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = match failure {
            None if !connected => Err(SyncError::NotConnected),
            None => {
                self.accepted.lock().push((key.clone(), payload.clone()));
                Ok(())
            }
            Some(MockFailure::Transient) => {
                Err(SyncError::transport_retryable("connection reset"))
            }
            Some(MockFailure::Permanent) => Err(SyncError::Rejected("payload refused".into())),
            Some(MockFailure::Hang) => std::future::pending().await,
        };

        self.attempts.lock().push(MockAttempt {
            key: key.clone(),
            at,
            succeeded: result.is_ok(),
        });
        result
    }
}
