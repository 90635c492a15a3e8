//! # offsync Sync Engine
//!
//! Reconciles locally queued writes with a remote authority.
//!
//! This crate provides:
//! - [`SyncEngine`] - drains a [`offsync_core::PendingWriteQueue`] with
//!   per-record retry and exponential backoff
//! - [`RemoteEndpoint`] - the write interface the engine delivers to
//! - [`ConnectivityMonitor`] - reachability flag with edge-triggered reconnect events
//! - [`SaveGuard`] / [`ForegroundSaver`] - single-flight saves of the current session
//! - [`spawn_auto_sync`] - drains automatically when the endpoint comes back
//!
//! ## Delivery model
//!
//! Writes flow one way, local to remote. Every record is delivered at least
//! once; its [`offsync_core::RecordKey`] travels with each attempt so the
//! endpoint can drop replays. A pass processes its snapshot in insertion
//! order and finishes one record's retries before the next:
//!
//! ```text
//! attempt 1 ──fail──▶ 2s ──▶ attempt 2 ──fail──▶ 4s ──▶ ... ──▶ 16s ──▶ attempt 5
//! ```
//!
//! Retryable failures leave the record queued for the next pass. Permanent
//! rejections skip the remaining attempts; after
//! [`SyncConfig::dead_letter_after`] such passes the record moves to the
//! dead-letter partition.
//!
//! ## Key Invariants
//!
//! - A record is removed only after the endpoint acknowledged it
//! - Passes never overlap
//! - Cancellation never interrupts a write in flight

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auto_sync;
mod config;
mod connectivity;
mod endpoint;
mod engine;
mod error;
mod foreground;
mod listeners;
mod save_guard;

pub use auto_sync::spawn_auto_sync;
pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{
    spawn_probe_loop, ConnectivityMonitor, ReachabilityProbe, ReconnectEvent, MIN_PROBE_INTERVAL,
};
pub use endpoint::{MockAttempt, MockEndpoint, MockFailure, RemoteEndpoint};
pub use engine::{ProgressFn, SyncEngine, SyncOutcome, SyncProgress, SyncStats, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use foreground::{ForegroundSaver, SaveDisposition};
pub use listeners::Subscription;
pub use save_guard::{SaveGuard, SaveState};
