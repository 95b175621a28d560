//! Dataset hot cache: bounded TTL+LRU view cache in front of the store.
//!
//! Holds the denormalized [`CompleteGeoData`] view per dataset so the API
//! collaborator reads in O(1) without touching SQLite. The cache only
//! mirrors the store - it never creates entities. Consistency comes from
//! write-through discipline: whichever component mutates the store
//! invalidates (or refreshes) the dataset's entry in the same critical
//! section, so a `get` after a mutating call returns the post-write view.
//!
//! Concurrent `get`s for a missing key coalesce: one loads from the store,
//! the rest wait on the per-key load lock and then hit the freshly inserted
//! entry.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lru::LruCache;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::model::DatasetId;
use crate::store::{CompleteGeoData, Result as StoreResult, Store};

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CachedEntry {
    view: CompleteGeoData,
    inserted_at: Instant,
}

/// Bounded TTL+LRU cache over `get_complete_geo_data`.
pub struct DatasetHotCache {
    store: Store,
    ttl: Duration,
    entries: Mutex<LruCache<String, CachedEntry>>,
    load_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DatasetHotCache {
    /// Creates a cache with `max_size` entries and a per-entry TTL.
    #[must_use]
    pub fn new(store: Store, max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
            load_locks: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the dataset view, loading it from the store on miss.
    ///
    /// Expired entries count as misses. `None` means the dataset does not
    /// exist in the store (never cached).
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    #[instrument(skip(self), fields(dataset_id = %dataset_id))]
    pub async fn get(&self, dataset_id: &DatasetId) -> StoreResult<Option<CompleteGeoData>> {
        let key = dataset_id.as_str().to_string();

        if let Some(view) = self.fresh_entry(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(view));
        }

        // Coalesce concurrent loads for the same key.
        let lock = self
            .load_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // A peer may have loaded while this task waited.
        if let Some(view) = self.fresh_entry(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.release_load_lock(&key, &lock);
            return Ok(Some(view));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.store.get_complete_geo_data(dataset_id).await;
        let result = match loaded {
            Ok(Some(view)) => {
                self.insert(key.clone(), view.clone());
                debug!("hot cache loaded from store");
                Ok(Some(view))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.release_load_lock(&key, &lock);
        result
    }

    /// Drops the dataset's entry.
    ///
    /// Called by whichever component just mutated the store, inside the
    /// same critical section as the mutation.
    #[instrument(skip(self), fields(dataset_id = %dataset_id))]
    pub fn invalidate(&self, dataset_id: &DatasetId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(dataset_id.as_str());
        }
    }

    /// Write-through variant: recomputes the view from the store and
    /// replaces the entry with it.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub async fn refresh(&self, dataset_id: &DatasetId) -> StoreResult<Option<CompleteGeoData>> {
        let view = self.store.get_complete_geo_data(dataset_id).await?;
        match &view {
            Some(view) => self.insert(dataset_id.as_str().to_string(), view.clone()),
            None => self.invalidate(dataset_id),
        }
        Ok(view)
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> HotCacheStats {
        HotCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn fresh_entry(&self, key: &str) -> Option<CompleteGeoData> {
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            entries.pop(key);
            return None;
        }
        Some(entry.view.clone())
    }

    fn insert(&self, key: String, view: CompleteGeoData) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let evicted = entries.push(
            key.clone(),
            CachedEntry {
                view,
                inserted_at: Instant::now(),
            },
        );
        // push returns the displaced entry; same-key replacement is not an
        // eviction.
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn release_load_lock(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let lock = Arc::clone(lock);
        self.load_locks
            .remove_if(key, |_, _| Arc::strong_count(&lock) <= 3);
    }
}

impl std::fmt::Debug for DatasetHotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetHotCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
