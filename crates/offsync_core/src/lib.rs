//! # offsync Core
//!
//! Durable local state for an offline-first client.
//!
//! This crate provides:
//! - [`LocalCache`] - read-through snapshot of reference data, replaced atomically
//! - [`PendingWriteQueue`] - insertion-ordered backlog of unacknowledged writes
//! - Dead-letter partition for records the remote side keeps rejecting
//! - CBOR record encoding (`serde` + `ciborium`)
//!
//! Both structures sit on top of an injected [`offsync_storage::KvStore`]
//! handle and may share one store; each uses its own partition.
//!
//! ## Key Invariants
//!
//! - A cache snapshot and its metadata are one value: no torn reads
//! - `enqueue` returns only after the record is durable
//! - A record leaves the queue only when acknowledged or dead-lettered
//! - `remove` is idempotent
//!
//! ## Example
//!
//! ```rust
//! use offsync_core::PendingWriteQueue;
//! use offsync_storage::InMemoryStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let queue: PendingWriteQueue<String, _> = PendingWriteQueue::open(store).unwrap();
//!
//! let key = queue.enqueue("score=17".to_string()).unwrap();
//! assert_eq!(queue.count().unwrap(), 1);
//!
//! queue.remove(&key).unwrap();
//! queue.remove(&key).unwrap(); // no-op
//! assert_eq!(queue.count().unwrap(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
pub mod codec;
mod error;
mod queue;
mod types;

pub use cache::{
    CacheLoad, CacheMeta, CacheSource, CachedDataset, LocalCache, CACHE_PARTITION,
    DEFAULT_CACHE_VERSION,
};
pub use error::{CoreError, CoreResult};
pub use queue::{
    DeadLetter, PendingWriteQueue, PendingWriteRecord, DEAD_LETTER_PARTITION, QUEUE_PARTITION,
};
pub use types::{now_millis, RecordKey};
