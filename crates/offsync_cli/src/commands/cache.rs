//! Cache maintenance.

use super::open_store;
use crate::error::CliResult;
use ciborium::Value;
use offsync_core::LocalCache;
use std::path::Path;

/// Runs the clear-cache command.
pub fn clear(path: &Path) -> CliResult<()> {
    let cache: LocalCache<Value, _> = LocalCache::new(open_store(path)?);
    match cache.meta() {
        Some(meta) => {
            cache.clear()?;
            tracing::info!(count = meta.count, "cache cleared");
            println!("Cleared cache snapshot ({} items)", meta.count);
        }
        None => println!("No cache snapshot present"),
    }
    Ok(())
}
