//! Pending-write queue commands.

use super::open_queue;
use crate::error::{CliError, CliResult};
use crate::render::{cbor_to_json, format_age, summarize, OutputFormat};
use offsync_core::{now_millis, PendingWriteRecord, RecordKey};
use serde::Serialize;
use std::path::Path;

/// A queued write as shown by `list-pending`.
#[derive(Debug, Serialize)]
pub struct PendingEntry {
    /// Record key.
    pub key: String,
    /// Insertion sequence number.
    pub seq: u64,
    /// Enqueue time (unix millis).
    pub enqueued_at: u64,
    /// Passes that ended in a permanent rejection.
    pub failed_passes: u32,
    /// Decoded payload.
    pub payload: serde_json::Value,
}

impl From<PendingWriteRecord<ciborium::Value>> for PendingEntry {
    fn from(record: PendingWriteRecord<ciborium::Value>) -> Self {
        Self {
            key: record.key.to_string(),
            seq: record.seq,
            enqueued_at: record.enqueued_at,
            failed_passes: record.failed_passes,
            payload: cbor_to_json(&record.payload),
        }
    }
}

/// Reads the queue in drain order.
pub fn collect(path: &Path) -> CliResult<Vec<PendingEntry>> {
    let queue = open_queue(path)?;
    Ok(queue
        .list_pending()?
        .into_iter()
        .map(PendingEntry::from)
        .collect())
}

/// Runs the list-pending command.
pub fn list(path: &Path, format: OutputFormat) -> CliResult<()> {
    let entries = collect(path)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No pending writes");
                return Ok(());
            }
            let now = now_millis();
            println!("{} pending write(s):", entries.len());
            for entry in &entries {
                println!(
                    "  #{:<6} {}  {:>8}  failed={}  {}",
                    entry.seq,
                    entry.key,
                    format_age(now, entry.enqueued_at),
                    entry.failed_passes,
                    summarize(&entry.payload)
                );
            }
        }
    }

    Ok(())
}

/// Runs the remove command.
pub fn remove(path: &Path, key: &str) -> CliResult<()> {
    let queue = open_queue(path)?;
    let key = RecordKey::parse(key)?;

    if queue.get(&key)?.is_none() {
        return Err(CliError::NotFound {
            kind: "pending write",
            key: key.to_string(),
        });
    }

    queue.remove(&key)?;
    tracing::info!(key = %key, "pending write removed");
    println!("Removed {key}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::PendingWriteQueue;
    use offsync_storage::FileStore;
    use offsync_testkit::{sample_result, SampleResult};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seed(dir: &TempDir, count: u32) -> Vec<RecordKey> {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let queue: PendingWriteQueue<SampleResult, _> = PendingWriteQueue::open(store).unwrap();
        (0..count)
            .map(|n| queue.enqueue(sample_result(n)).unwrap())
            .collect()
    }

    #[test]
    fn lists_typed_payloads_generically() {
        let dir = TempDir::new().unwrap();
        let keys = seed(&dir, 3);

        let entries = collect(dir.path()).unwrap();
        let listed: Vec<_> = entries.iter().map(|e| e.key.clone()).collect();
        let expected: Vec<_> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(listed, expected);
        assert_eq!(entries[1].payload["test_id"], "practice-1");
        assert_eq!(entries[1].payload["total"], 20);
    }

    #[test]
    fn remove_drops_one_record() {
        let dir = TempDir::new().unwrap();
        let keys = seed(&dir, 2);

        remove(dir.path(), keys[0].as_str()).unwrap();

        let entries = collect(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, keys[1].as_str());
    }

    #[test]
    fn remove_unknown_key_fails() {
        let dir = TempDir::new().unwrap();
        seed(&dir, 1);

        let err = remove(dir.path(), "pw-missing").unwrap_err();
        assert!(matches!(err, CliError::NotFound { .. }));
    }

    #[test]
    fn invalid_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        seed(&dir, 1);

        let err = remove(dir.path(), "../escape").unwrap_err();
        assert!(matches!(err, CliError::Core(_)));
    }

    #[test]
    fn missing_directory_is_not_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nowhere");

        let err = collect(&path).unwrap_err();
        assert!(matches!(err, CliError::NoStore(_)));
        assert!(!path.exists());
    }

    #[test]
    fn locked_store_is_reported() {
        let dir = TempDir::new().unwrap();
        let _held = FileStore::open(dir.path()).unwrap();

        let err = collect(dir.path()).unwrap_err();
        assert!(matches!(err, CliError::Storage(_) | CliError::Core(_)));
    }
}
