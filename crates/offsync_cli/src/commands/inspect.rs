//! Inspect command implementation.

use super::open_store;
use crate::error::CliResult;
use crate::render::{format_age, OutputFormat};
use ciborium::Value;
use offsync_core::{now_millis, LocalCache, PendingWriteQueue};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Reference-data snapshot, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    /// Queued writes.
    pub pending: usize,
    /// Enqueue time of the oldest queued write (unix millis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_at: Option<u64>,
    /// Queued writes with at least one rejected pass.
    pub rejected: usize,
    /// Dead-lettered writes.
    pub dead_letters: usize,
}

/// Snapshot statistics.
#[derive(Debug, Serialize)]
pub struct CacheStats {
    /// Items in the snapshot.
    pub count: usize,
    /// When it was written (unix millis).
    pub cached_at: u64,
    /// Schema version.
    pub version: u32,
}

/// Gathers statistics for the store at `path`.
pub fn collect(path: &Path) -> CliResult<InspectResult> {
    let store = open_store(path)?;

    let cache: LocalCache<Value, _> = LocalCache::new(Arc::clone(&store));
    let queue: PendingWriteQueue<Value, _> = PendingWriteQueue::open(store)?;
    let pending = queue.list_pending()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        cache: cache.meta().map(|meta| CacheStats {
            count: meta.count,
            cached_at: meta.cached_at,
            version: meta.version,
        }),
        pending: pending.len(),
        oldest_pending_at: pending.iter().map(|r| r.enqueued_at).min(),
        rejected: pending.iter().filter(|r| r.failed_passes > 0).count(),
        dead_letters: queue.dead_letter_count()?,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let result = collect(path)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let now = now_millis();

    println!("offsync Store Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Cache:");
    match &result.cache {
        Some(cache) => {
            println!("  Items:    {}", cache.count);
            println!("  Version:  {}", cache.version);
            println!("  Written:  {}", format_age(now, cache.cached_at));
        }
        None => println!("  (empty)"),
    }
    println!();
    println!("Queue:");
    println!("  Pending writes: {}", result.pending);
    if let Some(oldest) = result.oldest_pending_at {
        println!("  Oldest:         {}", format_age(now, oldest));
    }
    println!("  Rejected once+: {}", result.rejected);
    println!("  Dead letters:   {}", result.dead_letters);
}
