//! Local cache of reference data.
//!
//! The cache holds one snapshot per store: a list of items plus the time it
//! was cached and a schema version. Snapshot and metadata are encoded into a
//! single value, so replacing or deleting them is one store operation and a
//! concurrent reader can never see items from one write paired with metadata
//! from another.
//!
//! Storage failures never escape [`LocalCache::load_or_populate`] or
//! [`LocalCache::refresh`]; callers always get a usable item list.

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::types::now_millis;
use offsync_storage::KvStore;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// Partition holding the reference-data snapshot.
pub const CACHE_PARTITION: &str = "reference-cache";

/// Schema version written when none is configured.
pub const DEFAULT_CACHE_VERSION: u32 = 1;

const DATASET_KEY: &str = "dataset";

/// A cached snapshot of reference data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDataset<I> {
    /// The cached items.
    pub items: Vec<I>,
    /// When the snapshot was written (unix millis).
    pub cached_at: u64,
    /// Schema version of the snapshot.
    pub version: u32,
}

/// Snapshot metadata, readable without materializing the items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMeta {
    /// When the snapshot was written (unix millis).
    pub cached_at: u64,
    /// Number of items in the snapshot.
    pub count: usize,
    /// Schema version of the snapshot.
    pub version: u32,
}

/// Where the items returned by [`LocalCache::load_or_populate`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Read from an existing, current snapshot.
    Cache,
    /// The defaults were written as a new snapshot.
    Populated,
    /// Storage failed; the defaults are served from memory only.
    Fallback,
}

/// Result of [`LocalCache::load_or_populate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLoad<I> {
    /// Items to use.
    pub items: Vec<I>,
    /// Where they came from.
    pub source: CacheSource,
}

impl<I> CacheLoad<I> {
    /// Returns true if the items are backed by a persisted snapshot.
    pub fn is_cached(&self) -> bool {
        !matches!(self.source, CacheSource::Fallback)
    }
}

#[derive(Serialize)]
struct StoredDatasetRef<'a, I> {
    count: u64,
    cached_at: u64,
    version: u32,
    items: &'a [I],
}

#[derive(Deserialize)]
struct StoredDataset<I> {
    count: u64,
    cached_at: u64,
    version: u32,
    items: Vec<I>,
}

#[derive(Deserialize)]
struct StoredMeta {
    count: u64,
    cached_at: u64,
    version: u32,
    items: Vec<IgnoredAny>,
}

fn check_count(count: u64, items: usize) -> CoreResult<()> {
    if count != items as u64 {
        return Err(CoreError::corrupt(
            DATASET_KEY,
            format!("count {count} != {items} items"),
        ));
    }
    Ok(())
}

/// Read-through cache of reference data backed by a [`KvStore`].
pub struct LocalCache<I, S> {
    store: Arc<S>,
    version: u32,
    _items: PhantomData<fn() -> I>,
}

impl<I, S> LocalCache<I, S>
where
    I: Serialize + DeserializeOwned,
    S: KvStore,
{
    /// Creates a cache over `store` using [`DEFAULT_CACHE_VERSION`].
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            version: DEFAULT_CACHE_VERSION,
            _items: PhantomData,
        }
    }

    /// Sets the schema version. Snapshots written with an older version are
    /// replaced by [`LocalCache::load_or_populate`].
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Returns the configured schema version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns true if a non-empty snapshot exists.
    pub fn has_cache(&self) -> bool {
        match self.try_meta() {
            Ok(meta) => meta.is_some_and(|m| m.count > 0),
            Err(e) => {
                tracing::warn!(error = %e, "cache presence check failed");
                false
            }
        }
    }

    /// Loads the snapshot, treating any failure as absent.
    pub fn load(&self) -> Option<CachedDataset<I>> {
        match self.try_load() {
            Ok(dataset) => dataset,
            Err(e) => {
                tracing::warn!(error = %e, "cache load failed");
                None
            }
        }
    }

    /// Loads the snapshot, reporting storage and decoding failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails, the value does not decode, or the
    /// stored item count disagrees with the items present.
    pub fn try_load(&self) -> CoreResult<Option<CachedDataset<I>>> {
        let Some(bytes) = self.store.get(CACHE_PARTITION, DATASET_KEY)? else {
            return Ok(None);
        };

        let stored: StoredDataset<I> = codec::decode(&bytes)?;
        check_count(stored.count, stored.items.len())?;

        Ok(Some(CachedDataset {
            items: stored.items,
            cached_at: stored.cached_at,
            version: stored.version,
        }))
    }

    /// Replaces the snapshot and its metadata in one write.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails. The previous
    /// snapshot, if any, is left intact.
    pub fn store(&self, items: &[I]) -> CoreResult<()> {
        let bytes = codec::encode(&StoredDatasetRef {
            count: items.len() as u64,
            cached_at: now_millis(),
            version: self.version,
            items,
        })?;
        self.store.set(CACHE_PARTITION, DATASET_KEY, &bytes)?;
        tracing::debug!(count = items.len(), version = self.version, "cache stored");
        Ok(())
    }

    /// Deletes the snapshot and its metadata in one operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails.
    pub fn clear(&self) -> CoreResult<()> {
        self.store.delete(CACHE_PARTITION, DATASET_KEY)?;
        Ok(())
    }

    /// Returns snapshot metadata, treating any failure as absent.
    pub fn meta(&self) -> Option<CacheMeta> {
        match self.try_meta() {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(error = %e, "cache metadata read failed");
                None
            }
        }
    }

    fn try_meta(&self) -> CoreResult<Option<CacheMeta>> {
        let Some(bytes) = self.store.get(CACHE_PARTITION, DATASET_KEY)? else {
            return Ok(None);
        };
        let meta: StoredMeta = codec::decode(&bytes)?;
        check_count(meta.count, meta.items.len())?;
        Ok(Some(CacheMeta {
            cached_at: meta.cached_at,
            count: usize::try_from(meta.count).unwrap_or(usize::MAX),
            version: meta.version,
        }))
    }

    /// Returns cached items, or writes `defaults` as the first snapshot.
    ///
    /// - A current, non-empty snapshot is returned as-is.
    /// - A missing, empty, stale (older version) or corrupt snapshot is
    ///   replaced by `defaults`.
    /// - If the store itself fails, `defaults` are returned from memory.
    pub fn load_or_populate(&self, defaults: Vec<I>) -> CacheLoad<I> {
        match self.try_load() {
            Ok(Some(dataset)) if dataset.version >= self.version && !dataset.items.is_empty() => {
                return CacheLoad {
                    items: dataset.items,
                    source: CacheSource::Cache,
                };
            }
            Ok(Some(dataset)) => {
                tracing::info!(
                    stored_version = dataset.version,
                    version = self.version,
                    "replacing stale cache snapshot"
                );
            }
            Ok(None) => {}
            Err(e) if e.is_storage() => {
                tracing::warn!(error = %e, "cache unavailable, serving defaults from memory");
                return CacheLoad {
                    items: defaults,
                    source: CacheSource::Fallback,
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cache snapshot");
            }
        }

        match self.store(&defaults) {
            Ok(()) => CacheLoad {
                items: defaults,
                source: CacheSource::Populated,
            },
            Err(e) => {
                tracing::warn!(error = %e, "cache populate failed, serving defaults from memory");
                CacheLoad {
                    items: defaults,
                    source: CacheSource::Fallback,
                }
            }
        }
    }

    /// Replaces the snapshot with `items` and hands them back.
    ///
    /// A failed write is logged; the items are returned either way.
    pub fn refresh(&self, items: Vec<I>) -> Vec<I> {
        if let Err(e) = self.store(&items) {
            tracing::warn!(error = %e, "cache refresh failed");
        }
        items
    }
}
