//! Durable queue of pending writes.
//!
//! Each record is stored under its own key in [`QUEUE_PARTITION`], so enqueue
//! and remove are single atomic store operations. The only lock is held by
//! [`PendingWriteQueue::enqueue_with_key`], whose duplicate check and write
//! must not interleave with another insert of the same key. Ordering comes from a per-record sequence number assigned at
//! enqueue time and resumed from the stored records on [`PendingWriteQueue::open`].
//!
//! # Delivery
//!
//! The queue gives at-least-once delivery: a record is removed only after the
//! remote side acknowledged it. A crash between acknowledgment and removal
//! replays the record once more under the same [`RecordKey`], which the remote
//! endpoint uses to deduplicate.
//!
//! Records the remote side rejects permanently can be moved to
//! [`DEAD_LETTER_PARTITION`]. The move writes the dead-letter copy before
//! deleting the queued one, so a crash mid-move duplicates instead of losing.

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::types::{now_millis, RecordKey};
use offsync_storage::KvStore;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Partition holding unacknowledged write records.
pub const QUEUE_PARTITION: &str = "pending-writes";

/// Partition holding records removed from the queue after permanent rejection.
pub const DEAD_LETTER_PARTITION: &str = "dead-letters";

/// A write record awaiting remote acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWriteRecord<P> {
    /// Unique key, also the idempotency key for the remote write.
    pub key: RecordKey,
    /// Opaque write payload.
    pub payload: P,
    /// When the record was enqueued (unix millis).
    pub enqueued_at: u64,
    /// Insertion sequence number; defines FIFO order.
    pub seq: u64,
    /// Drain passes that ended with a permanent rejection.
    #[serde(default)]
    pub failed_passes: u32,
}

/// A record moved out of the queue after repeated permanent rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter<P> {
    /// The record as it was when dead-lettered.
    pub record: PendingWriteRecord<P>,
    /// When it was moved (unix millis).
    pub dead_lettered_at: u64,
}

#[derive(Deserialize)]
struct SeqOnly {
    seq: u64,
}

/// Durable, insertion-ordered backlog of unacknowledged writes.
///
/// # Thread Safety
///
/// All methods take `&self`; the queue can be shared across tasks in an
/// `Arc`. Producers and the sync engine may interleave freely.
pub struct PendingWriteQueue<P, S> {
    store: Arc<S>,
    next_seq: AtomicU64,
    insert_lock: Mutex<()>,
    _payload: PhantomData<fn() -> P>,
}

impl<P, S> PendingWriteQueue<P, S>
where
    P: Serialize + DeserializeOwned,
    S: KvStore,
{
    /// Opens the queue over `store`, resuming after any stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list the queue partition.
    pub fn open(store: Arc<S>) -> CoreResult<Self> {
        let mut next_seq = 1;
        let mut resumed = 0usize;
        for key in store.keys(QUEUE_PARTITION)? {
            let Some(bytes) = store.get(QUEUE_PARTITION, &key)? else {
                continue;
            };
            match codec::decode::<SeqOnly>(&bytes) {
                Ok(record) => {
                    next_seq = next_seq.max(record.seq + 1);
                    resumed += 1;
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable queue record"),
            }
        }

        if resumed > 0 {
            tracing::info!(pending = resumed, "queue has records from a previous run");
        }

        Ok(Self {
            store,
            next_seq: AtomicU64::new(next_seq),
            insert_lock: Mutex::new(()),
            _payload: PhantomData,
        })
    }

    /// Appends a payload under a freshly generated key.
    ///
    /// The record is durable when this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails.
    pub fn enqueue(&self, payload: P) -> CoreResult<RecordKey> {
        let key = RecordKey::generate();
        self.enqueue_with_key(key.clone(), payload)?;
        Ok(key)
    }

    /// Appends a payload under a caller-chosen key.
    ///
    /// Used when the producer already sent the key to the remote endpoint
    /// and must replay under the same idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key is already queued, or an
    /// error if encoding or the store write fails.
    pub fn enqueue_with_key(&self, key: RecordKey, payload: P) -> CoreResult<()> {
        let _insert = self.insert_lock.lock();
        if self.store.contains(QUEUE_PARTITION, key.as_str())? {
            return Err(CoreError::DuplicateKey(key.to_string()));
        }

        let record = PendingWriteRecord {
            key,
            payload,
            enqueued_at: now_millis(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            failed_passes: 0,
        };
        self.put(&record)?;
        tracing::debug!(key = %record.key, seq = record.seq, "write enqueued");
        Ok(())
    }

    /// Returns all pending records, oldest first.
    ///
    /// Records that fail to decode are logged and skipped; they stay in
    /// storage and still count toward [`PendingWriteQueue::count`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_pending(&self) -> CoreResult<Vec<PendingWriteRecord<P>>> {
        let mut records = Vec::new();
        for key in self.store.keys(QUEUE_PARTITION)? {
            let Some(bytes) = self.store.get(QUEUE_PARTITION, &key)? else {
                continue;
            };
            match codec::decode::<PendingWriteRecord<P>>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable queue record"),
            }
        }
        records.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.key.cmp(&b.key)));
        Ok(records)
    }

    /// Reads a single pending record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record does not decode.
    pub fn get(&self, key: &RecordKey) -> CoreResult<Option<PendingWriteRecord<P>>> {
        self.store
            .get(QUEUE_PARTITION, key.as_str())?
            .map(|bytes| codec::decode(&bytes))
            .transpose()
    }

    /// Removes an acknowledged record. Removing a missing key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails.
    pub fn remove(&self, key: &RecordKey) -> CoreResult<()> {
        self.store.delete(QUEUE_PARTITION, key.as_str())?;
        Ok(())
    }

    /// Number of pending records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list the partition.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.store.keys(QUEUE_PARTITION)?.len())
    }

    /// Returns true if nothing is pending.
    ///
    /// # Errors
    ///
    /// Same as [`PendingWriteQueue::count`].
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.count()? == 0)
    }

    /// Increments the permanent-failure pass counter of a record.
    ///
    /// Returns the new count, or `None` if the record is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record does not decode.
    pub fn record_failed_pass(&self, key: &RecordKey) -> CoreResult<Option<u32>> {
        let Some(mut record) = self.get(key)? else {
            return Ok(None);
        };
        record.failed_passes = record.failed_passes.saturating_add(1);
        self.put(&record)?;
        Ok(Some(record.failed_passes))
    }

    /// Moves a record from the queue to the dead-letter partition.
    ///
    /// Returns false if the record was not queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record does not decode.
    pub fn dead_letter(&self, key: &RecordKey) -> CoreResult<bool> {
        let Some(record) = self.get(key)? else {
            return Ok(false);
        };

        let letter = DeadLetter {
            record,
            dead_lettered_at: now_millis(),
        };
        self.store
            .set(DEAD_LETTER_PARTITION, key.as_str(), &codec::encode(&letter)?)?;
        self.store.delete(QUEUE_PARTITION, key.as_str())?;

        tracing::warn!(
            key = %key,
            failed_passes = letter.record.failed_passes,
            "record moved to dead letters"
        );
        Ok(true)
    }

    /// Returns all dead-lettered records, oldest move first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_dead_letters(&self) -> CoreResult<Vec<DeadLetter<P>>> {
        let mut letters = Vec::new();
        for key in self.store.keys(DEAD_LETTER_PARTITION)? {
            let Some(bytes) = self.store.get(DEAD_LETTER_PARTITION, &key)? else {
                continue;
            };
            match codec::decode::<DeadLetter<P>>(&bytes) {
                Ok(letter) => letters.push(letter),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable dead letter"),
            }
        }
        letters.sort_by(|a, b| {
            a.dead_lettered_at
                .cmp(&b.dead_lettered_at)
                .then_with(|| a.record.key.cmp(&b.record.key))
        });
        Ok(letters)
    }

    /// Number of dead-lettered records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list the partition.
    pub fn dead_letter_count(&self) -> CoreResult<usize> {
        Ok(self.store.keys(DEAD_LETTER_PARTITION)?.len())
    }

    /// Puts a dead-lettered record back at the tail of the queue with its
    /// failure counter reset.
    ///
    /// Returns false if no such dead letter exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record does not decode.
    pub fn requeue_dead_letter(&self, key: &RecordKey) -> CoreResult<bool> {
        let Some(bytes) = self.store.get(DEAD_LETTER_PARTITION, key.as_str())? else {
            return Ok(false);
        };
        let DeadLetter { mut record, .. } = codec::decode::<DeadLetter<P>>(&bytes)?;

        record.failed_passes = 0;
        record.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.put(&record)?;
        self.store.delete(DEAD_LETTER_PARTITION, key.as_str())?;

        tracing::info!(key = %key, "dead letter requeued");
        Ok(true)
    }

    /// Permanently discards a dead letter. Missing keys are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails.
    pub fn purge_dead_letter(&self, key: &RecordKey) -> CoreResult<()> {
        self.store.delete(DEAD_LETTER_PARTITION, key.as_str())?;
        Ok(())
    }

    fn put(&self, record: &PendingWriteRecord<P>) -> CoreResult<()> {
        self.store
            .set(QUEUE_PARTITION, record.key.as_str(), &codec::encode(record)?)?;
        Ok(())
    }
}
