//! Dead-letter commands.

use super::open_queue;
use crate::error::{CliError, CliResult};
use crate::render::{cbor_to_json, format_age, summarize, OutputFormat};
use offsync_core::{now_millis, DeadLetter, RecordKey};
use serde::Serialize;
use std::path::Path;

/// A dead-lettered write as shown by `dead-letters`.
#[derive(Debug, Serialize)]
pub struct DeadLetterEntry {
    /// Record key.
    pub key: String,
    /// Original enqueue time (unix millis).
    pub enqueued_at: u64,
    /// When the record was dead-lettered (unix millis).
    pub dead_lettered_at: u64,
    /// Rejected passes before it was moved.
    pub failed_passes: u32,
    /// Decoded payload.
    pub payload: serde_json::Value,
}

impl From<DeadLetter<ciborium::Value>> for DeadLetterEntry {
    fn from(letter: DeadLetter<ciborium::Value>) -> Self {
        Self {
            key: letter.record.key.to_string(),
            enqueued_at: letter.record.enqueued_at,
            dead_lettered_at: letter.dead_lettered_at,
            failed_passes: letter.record.failed_passes,
            payload: cbor_to_json(&letter.record.payload),
        }
    }
}

/// Reads all dead letters, oldest first.
pub fn collect(path: &Path) -> CliResult<Vec<DeadLetterEntry>> {
    let queue = open_queue(path)?;
    Ok(queue
        .list_dead_letters()?
        .into_iter()
        .map(DeadLetterEntry::from)
        .collect())
}

/// Runs the dead-letters command.
pub fn list(path: &Path, format: OutputFormat) -> CliResult<()> {
    let entries = collect(path)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No dead letters");
                return Ok(());
            }
            let now = now_millis();
            println!("{} dead letter(s):", entries.len());
            for entry in &entries {
                println!(
                    "  {}  moved {:>8}  failed={}  {}",
                    entry.key,
                    format_age(now, entry.dead_lettered_at),
                    entry.failed_passes,
                    summarize(&entry.payload)
                );
            }
        }
    }

    Ok(())
}

/// Runs the requeue command.
pub fn requeue(path: &Path, key: &str) -> CliResult<()> {
    let queue = open_queue(path)?;
    let key = RecordKey::parse(key)?;

    if !queue.requeue_dead_letter(&key)? {
        return Err(CliError::NotFound {
            kind: "dead letter",
            key: key.to_string(),
        });
    }

    println!("Requeued {key}");
    Ok(())
}
