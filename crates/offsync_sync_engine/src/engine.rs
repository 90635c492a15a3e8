//! Drain engine: delivers queued writes with per-record retry and backoff.

use crate::config::SyncConfig;
use crate::endpoint::RemoteEndpoint;
use crate::error::{SyncError, SyncResult};
use offsync_core::{now_millis, PendingWriteQueue, PendingWriteRecord, RecordKey};
use offsync_storage::KvStore;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Status carried by a [`SyncProgress`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The pass is running.
    Syncing,
    /// The pass finished and every record was delivered.
    Success,
    /// The pass finished with at least one record left behind.
    Error,
}

/// Progress of a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    /// Records processed so far.
    pub current: usize,
    /// Records in the pass snapshot.
    pub total: usize,
    /// Pass status.
    pub status: SyncStatus,
}

impl SyncProgress {
    fn new(current: usize, total: usize, status: SyncStatus) -> Self {
        Self {
            current,
            total,
            status,
        }
    }
}

/// Progress callback accepted by the drain methods.
pub type ProgressFn<'a> = &'a (dyn Fn(SyncProgress) + Send + Sync);

/// Aggregate result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Records acknowledged and removed.
    pub synced: usize,
    /// Records that exhausted retries or were rejected; they stay queued
    /// unless also counted in `dead_lettered`.
    pub failed: usize,
    /// Failed records moved to the dead-letter partition in this pass.
    pub dead_lettered: usize,
    /// The pass stopped early because it was cancelled.
    pub cancelled: bool,
}

impl SyncOutcome {
    /// Returns true if nothing failed and the pass ran to the end.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

/// Statistics accumulated across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that processed at least one record.
    pub passes: u64,
    /// Records delivered.
    pub synced: u64,
    /// Record failures (one per record per pass).
    pub failed: u64,
    /// Backoff retries performed.
    pub retries: u64,
    /// Records dead-lettered.
    pub dead_lettered: u64,
    /// Last delivery error message, cleared by a clean pass.
    pub last_error: Option<String>,
    /// When the last pass finished (unix millis).
    pub last_pass_at: Option<u64>,
}

enum Delivery {
    Acked,
    Failed(SyncError),
    Cancelled,
}

/// Drains a [`PendingWriteQueue`] into a [`RemoteEndpoint`].
///
/// A pass snapshots the queue once, then delivers records strictly in
/// insertion order, finishing all retries for one record before moving to the
/// next. Records enqueued during a pass wait for the next one.
///
/// Passes are serialized: a second [`SyncEngine::drain`] waits for the
/// running one, and [`SyncEngine::try_drain`] returns `None` instead.
pub struct SyncEngine<P, S, E> {
    queue: Arc<PendingWriteQueue<P, S>>,
    endpoint: Arc<E>,
    config: SyncConfig,
    pass_lock: Mutex<()>,
    stats: RwLock<SyncStats>,
    outcome_tx: watch::Sender<Option<SyncOutcome>>,
}

impl<P, S, E> SyncEngine<P, S, E>
where
    P: Serialize + DeserializeOwned + Send + Sync,
    S: KvStore,
    E: RemoteEndpoint<P>,
{
    /// Creates an engine over a shared queue and endpoint.
    pub fn new(
        queue: Arc<PendingWriteQueue<P, S>>,
        endpoint: Arc<E>,
        config: SyncConfig,
    ) -> Self {
        let (outcome_tx, _) = watch::channel(None);
        Self {
            queue,
            endpoint,
            config,
            pass_lock: Mutex::new(()),
            stats: RwLock::new(SyncStats::default()),
            outcome_tx,
        }
    }

    /// The queue this engine drains.
    pub fn queue(&self) -> &Arc<PendingWriteQueue<P, S>> {
        &self.queue
    }

    /// The endpoint this engine writes to.
    pub fn endpoint(&self) -> &Arc<E> {
        &self.endpoint
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Subscribes to the outcome of each completed pass.
    pub fn subscribe_outcomes(&self) -> watch::Receiver<Option<SyncOutcome>> {
        self.outcome_tx.subscribe()
    }

    /// Returns true while a pass is running.
    pub fn is_draining(&self) -> bool {
        self.pass_lock.try_lock().is_err()
    }

    /// Number of records waiting in the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.queue.count()?)
    }

    /// Runs one pass to completion.
    ///
    /// Progress is reported as `{0, total, Syncing}` at the start,
    /// `{i + 1, total, Syncing}` after each record and
    /// `{total, total, Success | Error}` at the end. An empty queue yields
    /// a zero outcome without any progress report.
    pub async fn drain(&self, on_progress: Option<ProgressFn<'_>>) -> SyncOutcome {
        self.drain_with_cancel(&CancellationToken::new(), on_progress).await
    }

    /// Runs one pass, stopping early when `cancel` fires.
    ///
    /// Cancellation is observed before each record and during backoff
    /// delays. A write already sent to the endpoint is awaited; the record
    /// being retried stays queued.
    pub async fn drain_with_cancel(
        &self,
        cancel: &CancellationToken,
        on_progress: Option<ProgressFn<'_>>,
    ) -> SyncOutcome {
        let _pass = self.pass_lock.lock().await;
        self.run_pass(cancel, on_progress).await
    }

    /// Runs one pass unless another is already running.
    pub async fn try_drain(
        &self,
        cancel: &CancellationToken,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Option<SyncOutcome> {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            tracing::debug!("drain already in progress, skipping");
            return None;
        };
        Some(self.run_pass(cancel, on_progress).await)
    }

    async fn run_pass(
        &self,
        cancel: &CancellationToken,
        on_progress: Option<ProgressFn<'_>>,
    ) -> SyncOutcome {
        let report = |progress: SyncProgress| {
            if let Some(callback) = on_progress {
                callback(progress);
            }
        };

        let records = match self.queue.list_pending() {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "cannot read pending writes");
                self.stats.write().last_error = Some(e.to_string());
                return SyncOutcome::default();
            }
        };

        let total = records.len();
        if total == 0 {
            return SyncOutcome::default();
        }

        tracing::info!(total, "draining pending writes");
        report(SyncProgress::new(0, total, SyncStatus::Syncing));

        let mut outcome = SyncOutcome::default();
        let mut last_error = None;
        let mut processed = 0;

        for record in &records {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            match self.deliver(record, cancel).await {
                Delivery::Acked => {
                    if let Err(e) = self.queue.remove(&record.key) {
                        // Acknowledged but still queued: the next pass replays it.
                        tracing::warn!(
                            key = %record.key,
                            error = %e,
                            "failed to remove delivered write"
                        );
                    }
                    outcome.synced += 1;
                }
                Delivery::Failed(e) => {
                    outcome.failed += 1;
                    if !e.is_retryable() && self.note_permanent_failure(&record.key) {
                        outcome.dead_lettered += 1;
                    }
                    last_error = Some(e.to_string());
                }
                Delivery::Cancelled => {
                    outcome.cancelled = true;
                    break;
                }
            }

            processed += 1;
            report(SyncProgress::new(processed, total, SyncStatus::Syncing));
        }

        let status = if outcome.is_clean() {
            SyncStatus::Success
        } else {
            SyncStatus::Error
        };
        report(SyncProgress::new(processed, total, status));

        if outcome.cancelled {
            tracing::info!(
                synced = outcome.synced,
                remaining = total - processed,
                "drain cancelled"
            );
        } else {
            tracing::info!(
                synced = outcome.synced,
                failed = outcome.failed,
                dead_lettered = outcome.dead_lettered,
                "drain finished"
            );
        }

        {
            let mut stats = self.stats.write();
            stats.passes += 1;
            stats.synced += outcome.synced as u64;
            stats.failed += outcome.failed as u64;
            stats.dead_lettered += outcome.dead_lettered as u64;
            stats.last_pass_at = Some(now_millis());
            if last_error.is_some() || outcome.is_clean() {
                stats.last_error = last_error;
            }
        }
        self.outcome_tx.send_replace(Some(outcome));

        outcome
    }

    async fn deliver(
        &self,
        record: &PendingWriteRecord<P>,
        cancel: &CancellationToken,
    ) -> Delivery {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            let error = match self.write_once(record).await {
                Ok(()) => {
                    tracing::debug!(key = %record.key, attempt, "write acknowledged");
                    return Delivery::Acked;
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::warn!(key = %record.key, error = %error, "write rejected");
                return Delivery::Failed(error);
            }

            attempt += 1;
            if attempt >= retry.max_attempts {
                tracing::warn!(
                    key = %record.key,
                    attempts = attempt,
                    error = %error,
                    "retries exhausted"
                );
                return Delivery::Failed(error);
            }

            let delay = retry.delay_for_attempt(attempt);
            tracing::debug!(
                key = %record.key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "write failed, backing off"
            );
            self.stats.write().retries += 1;

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Delivery::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn write_once(&self, record: &PendingWriteRecord<P>) -> SyncResult<()> {
        let write = self.endpoint.write(&record.key, &record.payload);
        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .unwrap_or(Err(SyncError::Timeout)),
            None => write.await,
        }
    }

    /// Bumps the failure counter and dead-letters the record once it reaches
    /// the configured threshold. Returns true if the record was moved.
    fn note_permanent_failure(&self, key: &RecordKey) -> bool {
        let passes = match self.queue.record_failed_pass(key) {
            Ok(Some(passes)) => passes,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to record rejected pass");
                return false;
            }
        };

        match self.config.dead_letter_after {
            Some(limit) if passes >= limit => match self.queue.dead_letter(key) {
                Ok(moved) => moved,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to dead-letter record");
                    false
                }
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::endpoint::{MockEndpoint, MockFailure};
    use offsync_storage::InMemoryStore;
    use std::time::Duration;
    use tokio::time::Instant;

    type Queue = PendingWriteQueue<String, InMemoryStore>;
    type Engine = SyncEngine<String, InMemoryStore, MockEndpoint<String>>;

    struct Harness {
        store: Arc<InMemoryStore>,
        queue: Arc<Queue>,
        endpoint: Arc<MockEndpoint<String>>,
        engine: Arc<Engine>,
    }

    fn harness(config: SyncConfig) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(PendingWriteQueue::open(Arc::clone(&store)).unwrap());
        let endpoint = Arc::new(MockEndpoint::new());
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&endpoint),
            config,
        ));
        Harness {
            store,
            queue,
            endpoint,
            engine,
        }
    }

    fn progress(current: usize, total: usize, status: SyncStatus) -> SyncProgress {
        SyncProgress::new(current, total, status)
    }

    #[tokio::test]
    async fn empty_queue_reports_nothing() {
        let h = harness(SyncConfig::default());
        let seen = parking_lot::Mutex::new(Vec::new());

        let outcome = h.engine.drain(Some(&|p: SyncProgress| seen.lock().push(p))).await;

        assert_eq!(outcome, SyncOutcome::default());
        assert!(seen.lock().is_empty());
        assert_eq!(h.engine.stats().passes, 0);
    }

    #[tokio::test]
    async fn delivers_in_order_and_reports_progress() {
        let h = harness(SyncConfig::default());
        let keys: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|p| h.queue.enqueue(p.to_string()).unwrap())
            .collect();
        let seen = parking_lot::Mutex::new(Vec::new());

        let outcome = h.engine.drain(Some(&|p: SyncProgress| seen.lock().push(p))).await;

        assert_eq!(outcome.synced, 3);
        assert!(outcome.is_clean());
        assert_eq!(h.endpoint.accepted_keys(), keys);
        assert_eq!(h.queue.count().unwrap(), 0);
        assert_eq!(
            *seen.lock(),
            vec![
                progress(0, 3, SyncStatus::Syncing),
                progress(1, 3, SyncStatus::Syncing),
                progress(2, 3, SyncStatus::Syncing),
                progress(3, 3, SyncStatus::Syncing),
                progress(3, 3, SyncStatus::Success),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_is_2_4_8_16() {
        let h = harness(SyncConfig::default());
        let key = h.queue.enqueue("x".into()).unwrap();
        h.endpoint.fail_always(&key, MockFailure::Transient);

        let start = Instant::now();
        let outcome = h.engine.drain(None).await;

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.synced, 0);
        assert_eq!(h.queue.count().unwrap(), 1);

        let offsets: Vec<u64> = h
            .endpoint
            .attempts()
            .iter()
            .map(|a| a.at.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 2, 6, 14, 30]);
        assert_eq!(h.engine.stats().retries, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn one_bad_record_does_not_block_the_rest() {
        let h = harness(SyncConfig::default());
        let a = h.queue.enqueue("a".into()).unwrap();
        let b = h.queue.enqueue("b".into()).unwrap();
        let c = h.queue.enqueue("c".into()).unwrap();
        h.endpoint.fail_always(&b, MockFailure::Transient);
        let seen = parking_lot::Mutex::new(Vec::new());

        let outcome = h.engine.drain(Some(&|p: SyncProgress| seen.lock().push(p))).await;

        assert_eq!((outcome.synced, outcome.failed), (2, 1));
        assert_eq!(h.endpoint.accepted_keys(), vec![a, c]);
        let pending = h.queue.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, b);
        assert_eq!(seen.lock().last(), Some(&progress(3, 3, SyncStatus::Error)));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success() {
        let h = harness(SyncConfig::default());
        let key = h.queue.enqueue("x".into()).unwrap();
        h.endpoint.fail_times(&key, MockFailure::Transient, 2);

        let outcome = h.engine.drain(None).await;

        assert_eq!(outcome.synced, 1);
        assert_eq!(h.endpoint.attempts_for(&key), 3);
        assert!(h.queue.is_empty().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_dead_letter_after_threshold() {
        let h = harness(SyncConfig::default());
        let key = h.queue.enqueue("bad".into()).unwrap();
        h.endpoint.fail_always(&key, MockFailure::Permanent);

        for pass in 1..=2 {
            let outcome = h.engine.drain(None).await;
            assert_eq!((outcome.failed, outcome.dead_lettered), (1, 0));
            assert_eq!(h.queue.get(&key).unwrap().unwrap().failed_passes, pass);
        }
        // No retries within a pass for a permanent rejection.
        assert_eq!(h.endpoint.attempts_for(&key), 2);

        let outcome = h.engine.drain(None).await;
        assert_eq!((outcome.failed, outcome.dead_lettered), (1, 1));
        assert!(h.queue.is_empty().unwrap());
        assert_eq!(h.queue.dead_letter_count().unwrap(), 1);
        assert_eq!(h.engine.stats().dead_lettered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_never_dead_letter() {
        let h = harness(SyncConfig::default().with_retry(RetryConfig::no_retry()));
        let key = h.queue.enqueue("x".into()).unwrap();
        h.endpoint.fail_always(&key, MockFailure::Transient);

        for _ in 0..5 {
            assert_eq!(h.engine.drain(None).await.failed, 1);
        }
        assert_eq!(h.queue.get(&key).unwrap().unwrap().failed_passes, 0);
        assert_eq!(h.queue.dead_letter_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_lettering_can_be_disabled() {
        let h = harness(SyncConfig::default().without_dead_letters());
        let key = h.queue.enqueue("bad".into()).unwrap();
        h.endpoint.fail_always(&key, MockFailure::Permanent);

        for _ in 0..4 {
            h.engine.drain(None).await;
        }
        assert_eq!(h.queue.get(&key).unwrap().unwrap().failed_passes, 4);
        assert_eq!(h.queue.dead_letter_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_keeps_record() {
        let h = harness(SyncConfig::default());
        let key = h.queue.enqueue("x".into()).unwrap();
        let later = h.queue.enqueue("y".into()).unwrap();
        h.endpoint.fail_always(&key, MockFailure::Transient);

        let cancel = CancellationToken::new();
        let task = {
            let engine = Arc::clone(&h.engine);
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.drain_with_cancel(&cancel, None).await })
        };

        // First backoff is 2s; cancel inside it.
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let outcome = task.await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!((outcome.synced, outcome.failed), (0, 0));
        assert_eq!(h.endpoint.attempts_for(&key), 1);
        assert_eq!(h.endpoint.attempts_for(&later), 0);
        assert_eq!(h.queue.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_token_delivers_nothing() {
        let h = harness(SyncConfig::default());
        h.queue.enqueue("x".into()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h.engine.drain_with_cancel(&cancel, None).await;

        assert!(outcome.cancelled);
        assert!(h.endpoint.attempts().is_empty());
        assert_eq!(h.queue.count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_write_times_out_as_retryable() {
        let h = harness(
            SyncConfig::default()
                .with_retry(RetryConfig::new(2))
                .with_request_timeout(Duration::from_secs(5)),
        );
        let key = h.queue.enqueue("x".into()).unwrap();
        h.endpoint.fail_times(&key, MockFailure::Hang, 1);

        let outcome = h.engine.drain(None).await;

        assert_eq!(outcome.synced, 1);
        assert_eq!(h.engine.stats().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_drains_do_not_double_submit() {
        let h = harness(SyncConfig::default());
        h.endpoint.set_delay(Duration::from_millis(500));
        for i in 0..3 {
            h.queue.enqueue(format!("r{i}")).unwrap();
        }

        let (first, second) = tokio::join!(h.engine.drain(None), h.engine.drain(None));

        assert_eq!(first.synced + second.synced, 3);
        assert_eq!(h.endpoint.accepted().len(), 3);
        assert_eq!(h.endpoint.attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn try_drain_skips_while_running() {
        let h = harness(SyncConfig::default());
        h.endpoint.set_delay(Duration::from_secs(1));
        h.queue.enqueue("x".into()).unwrap();

        let task = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.drain(None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.engine.is_draining());
        assert!(h.engine.try_drain(&CancellationToken::new(), None).await.is_none());
        assert_eq!(task.await.unwrap().synced, 1);
        assert!(!h.engine.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn records_enqueued_mid_pass_wait_for_next_pass() {
        let h = harness(SyncConfig::default());
        h.endpoint.set_delay(Duration::from_secs(1));
        h.queue.enqueue("early".into()).unwrap();

        let task = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.drain(None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let late = h.queue.enqueue("late".into()).unwrap();

        assert_eq!(task.await.unwrap().synced, 1);
        assert_eq!(h.queue.list_pending().unwrap()[0].key, late);

        assert_eq!(h.engine.drain(None).await.synced, 1);
        assert!(h.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn stats_and_outcome_channel() {
        let h = harness(SyncConfig::default().with_retry(RetryConfig::no_retry()));
        let mut outcomes = h.engine.subscribe_outcomes();
        let bad = h.queue.enqueue("bad".into()).unwrap();
        h.queue.enqueue("good".into()).unwrap();
        h.endpoint.fail_always(&bad, MockFailure::Transient);

        let outcome = h.engine.drain(None).await;

        assert!(outcomes.has_changed().unwrap());
        assert_eq!(*outcomes.borrow_and_update(), Some(outcome));

        let stats = h.engine.stats();
        assert_eq!((stats.passes, stats.synced, stats.failed), (1, 1, 1));
        assert!(stats.last_error.is_some());
        assert!(stats.last_pass_at.is_some());

        h.endpoint.heal(&bad);
        assert!(h.engine.drain(None).await.is_clean());
        assert!(h.engine.stats().last_error.is_none());
    }

    #[tokio::test]
    async fn unreadable_record_is_skipped() {
        let h = harness(SyncConfig::default());
        h.queue.enqueue("x".into()).unwrap();
        h.store
            .set(offsync_core::QUEUE_PARTITION, "pw-broken", b"\xff")
            .unwrap();

        // The broken record is skipped; the good one is delivered.
        let outcome = h.engine.drain(None).await;
        assert_eq!(outcome.synced, 1);
        assert_eq!(h.engine.pending_count().unwrap(), 1);
    }
}
