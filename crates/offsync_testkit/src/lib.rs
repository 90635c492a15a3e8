//! # offsync Testkit
//!
//! Test utilities for offsync.
//!
//! This crate provides:
//! - Temporary file stores that clean up after themselves
//! - Sample payload and reference-data types shaped like real quiz data
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use offsync_core::PendingWriteQueue;
//! use offsync_testkit::{sample_result, TempStore};
//!
//! let temp = TempStore::new();
//! {
//!     let queue = PendingWriteQueue::open(temp.store()).unwrap();
//!     queue.enqueue(sample_result(1)).unwrap();
//! }
//!
//! // Reopen the same directory, as after a restart.
//! let temp = temp.reopen();
//! let queue: PendingWriteQueue<offsync_testkit::SampleResult, _> =
//!     PendingWriteQueue::open(temp.store()).unwrap();
//! assert_eq!(queue.count().unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
