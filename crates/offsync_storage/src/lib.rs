//! # offsync Storage
//!
//! Partitioned key-value storage for offsync.
//!
//! This crate provides the lowest-level persistence abstraction. Stores are
//! **opaque byte maps** grouped into named partitions; they do not interpret
//! the values they hold.
//!
//! ## Design Principles
//!
//! - Four operations per partition: `get`, `set`, `delete`, `keys`
//! - A single `set` is atomic: readers see the old or the new value, never a mix
//! - Deleting a missing key is not an error
//! - Must be `Send + Sync`; handles are shared via `Arc`
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sessions
//! - [`FileStore`] - Directory-backed persistent store with single-writer lock
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{KvStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.set("pending-writes", "pw-1", b"hello").unwrap();
//! assert_eq!(store.get("pending-writes", "pw-1").unwrap().as_deref(), Some(&b"hello"[..]));
//! assert_eq!(store.keys("pending-writes").unwrap(), vec!["pw-1".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{validate_name, KvStore, MAX_NAME_LEN};
