//! Foreground save: try the endpoint now, fall back to the queue.

use crate::connectivity::ConnectivityMonitor;
use crate::endpoint::RemoteEndpoint;
use crate::error::{SyncError, SyncResult};
use crate::save_guard::SaveGuard;
use offsync_core::{PendingWriteQueue, RecordKey};
use offsync_storage::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// What happened to a submitted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveDisposition {
    /// The endpoint acknowledged the write.
    Delivered(RecordKey),
    /// The write was queued for a later drain.
    Queued(RecordKey),
    /// A save for this slot is running or already succeeded.
    Skipped,
}

impl SaveDisposition {
    /// The record key, unless skipped.
    pub fn key(&self) -> Option<&RecordKey> {
        match self {
            SaveDisposition::Delivered(key) | SaveDisposition::Queued(key) => Some(key),
            SaveDisposition::Skipped => None,
        }
    }
}

/// Saves the current session's result exactly once.
///
/// A submit is guarded by a [`SaveGuard`]: duplicate triggers are skipped.
/// The write goes straight to the endpoint when it is believed reachable;
/// when it is known to be offline, or the write fails with a retryable
/// error, the payload is queued under the key already used so a later
/// replay stays idempotent. A permanent rejection is returned to the caller.
pub struct ForegroundSaver<P, S, E> {
    guard: SaveGuard,
    queue: Arc<PendingWriteQueue<P, S>>,
    endpoint: Arc<E>,
    monitor: Option<Arc<ConnectivityMonitor>>,
    request_timeout: Option<Duration>,
}

impl<P, S, E> ForegroundSaver<P, S, E>
where
    P: Serialize + DeserializeOwned + Send + Sync,
    S: KvStore,
    E: RemoteEndpoint<P>,
{
    /// Creates a saver writing to `endpoint` with `queue` as fallback.
    pub fn new(queue: Arc<PendingWriteQueue<P, S>>, endpoint: Arc<E>) -> Self {
        Self {
            guard: SaveGuard::new(),
            queue,
            endpoint,
            monitor: None,
            request_timeout: None,
        }
    }

    /// Queues directly, without trying the endpoint, while `monitor`
    /// reports the endpoint unreachable.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Bounds the foreground write; a timeout queues the payload.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// The underlying guard, for state inspection and subscriptions.
    pub fn guard(&self) -> &SaveGuard {
        &self.guard
    }

    /// Opens the slot for the next session.
    pub fn reset(&self) {
        self.guard.reset();
    }

    /// Saves `payload` once.
    ///
    /// # Errors
    ///
    /// Returns the endpoint error on permanent rejection, or a queue error
    /// if the fallback enqueue fails. Either leaves the guard in `Error`.
    pub async fn submit(&self, payload: P) -> SyncResult<SaveDisposition> {
        let saved = self.guard.save(|| self.deliver_or_queue(payload)).await?;
        Ok(saved.unwrap_or(SaveDisposition::Skipped))
    }

    async fn deliver_or_queue(&self, payload: P) -> SyncResult<SaveDisposition> {
        let key = RecordKey::generate();

        if self.monitor.as_ref().is_some_and(|m| !m.is_reachable()) {
            tracing::debug!(key = %key, "offline, queueing save");
            self.queue.enqueue_with_key(key.clone(), payload)?;
            return Ok(SaveDisposition::Queued(key));
        }

        match self.write(&key, &payload).await {
            Ok(()) => Ok(SaveDisposition::Delivered(key)),
            Err(e) if e.is_retryable() => {
                tracing::info!(key = %key, error = %e, "save failed, queued for sync");
                self.queue.enqueue_with_key(key.clone(), payload)?;
                Ok(SaveDisposition::Queued(key))
            }
            Err(e) => Err(e),
        }
    }

    async fn write(&self, key: &RecordKey, payload: &P) -> SyncResult<()> {
        let write = self.endpoint.write(key, payload);
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .unwrap_or(Err(SyncError::Timeout)),
            None => write.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::MockEndpoint;
    use crate::save_guard::SaveState;
    use offsync_storage::InMemoryStore;

    type Saver = ForegroundSaver<String, InMemoryStore, MockEndpoint<String>>;
    type Queue = PendingWriteQueue<String, InMemoryStore>;

    fn saver() -> (Arc<Queue>, Arc<MockEndpoint<String>>, Saver) {
        let queue = Arc::new(PendingWriteQueue::open(Arc::new(InMemoryStore::new())).unwrap());
        let endpoint = Arc::new(MockEndpoint::new());
        let saver = ForegroundSaver::new(Arc::clone(&queue), Arc::clone(&endpoint));
        (queue, endpoint, saver)
    }

    #[tokio::test]
    async fn delivers_when_online() {
        let (queue, endpoint, saver) = saver();

        let disposition = saver.submit("score=9".into()).await.unwrap();

        assert!(matches!(disposition, SaveDisposition::Delivered(_)));
        assert_eq!(endpoint.accepted_keys(), vec![disposition.key().unwrap().clone()]);
        assert!(queue.is_empty().unwrap());
        assert_eq!(saver.guard().state(), SaveState::Saved);
    }

    #[tokio::test]
    async fn duplicate_trigger_is_skipped() {
        let (_, endpoint, saver) = saver();
        saver.submit("a".into()).await.unwrap();

        assert_eq!(saver.submit("a".into()).await.unwrap(), SaveDisposition::Skipped);
        assert_eq!(endpoint.accepted().len(), 1);

        saver.reset();
        assert!(matches!(
            saver.submit("b".into()).await.unwrap(),
            SaveDisposition::Delivered(_)
        ));
    }

    #[tokio::test]
    async fn transient_failure_queues_under_same_key() {
        let (queue, endpoint, saver) = saver();
        endpoint.set_connected(false);

        let disposition = saver.submit("score=3".into()).await.unwrap();

        let key = match disposition {
            SaveDisposition::Queued(key) => key,
            other => panic!("expected queued, got {other:?}"),
        };
        assert_eq!(endpoint.attempts()[0].key, key);
        let pending = queue.list_pending().unwrap();
        assert_eq!(pending[0].key, key);
        assert_eq!(pending[0].payload, "score=3");
        assert_eq!(saver.guard().state(), SaveState::Saved);
    }

    #[tokio::test]
    async fn known_offline_skips_the_endpoint() {
        let (queue, endpoint, saver) = saver();
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let saver = saver.with_monitor(monitor);

        let disposition = saver.submit("x".into()).await.unwrap();

        assert!(matches!(disposition, SaveDisposition::Queued(_)));
        assert!(endpoint.attempts().is_empty());
        assert_eq!(queue.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn permanent_rejection_is_returned() {
        let queue: Arc<Queue> = Arc::new(PendingWriteQueue::open(Arc::new(InMemoryStore::new())).unwrap());
        let endpoint = Arc::new(RejectAll);
        let saver = ForegroundSaver::new(Arc::clone(&queue), endpoint);

        let err = saver.submit("bad".to_string()).await.unwrap_err();

        assert!(matches!(err, SyncError::Rejected(_)));
        assert!(queue.is_empty().unwrap());
        assert_eq!(saver.guard().state(), SaveState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_queues() {
        let (queue, endpoint, saver) = saver();
        let saver = saver.with_request_timeout(Duration::from_secs(3));
        endpoint.set_delay(Duration::from_secs(60));

        let disposition = saver.submit("slow".into()).await.unwrap();

        assert!(matches!(disposition, SaveDisposition::Queued(_)));
        assert_eq!(queue.count().unwrap(), 1);
    }

    struct RejectAll;

    #[async_trait::async_trait]
    impl RemoteEndpoint<String> for RejectAll {
        async fn write(&self, _key: &RecordKey, _payload: &String) -> SyncResult<()> {
            Err(SyncError::Rejected("invalid score".into()))
        }
    }

    #[test]
    fn disposition_key() {
        assert!(SaveDisposition::Skipped.key().is_none());
        let key = RecordKey::generate();
        assert_eq!(SaveDisposition::Queued(key.clone()).key(), Some(&key));
    }
}
