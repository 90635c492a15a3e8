//! CLI command implementations.

pub mod cache;
pub mod dead_letters;
pub mod inspect;
pub mod pending;

use crate::error::{CliError, CliResult};
use ciborium::Value;
use offsync_core::PendingWriteQueue;
use offsync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;

/// Queue view with payloads decoded as generic CBOR.
pub type RawQueue = PendingWriteQueue<Value, FileStore>;

/// Opens an existing store directory. Never creates one.
pub fn open_store(path: &Path) -> CliResult<Arc<FileStore>> {
    if !path.is_dir() {
        return Err(CliError::NoStore(path.to_path_buf()));
    }
    Ok(Arc::new(FileStore::open(path)?))
}

/// Opens the pending-write queue of an existing store.
pub fn open_queue(path: &Path) -> CliResult<RawQueue> {
    Ok(PendingWriteQueue::open(open_store(path)?)?)
}
