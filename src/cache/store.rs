//! Synchronized Cache
//!
//! Thread-safe wrapper around [`LruCache`] used by each group.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` per group; LRU operations are O(1) so a
//!   coarse lock is enough
//! - The underlying cache is allocated on first insert
//! - Loaders and peer fetches never run under this lock

use std::sync::Arc;

use parking_lot::Mutex;

use super::byteview::ByteView;
use super::lru::LruCache;
use super::stats::GroupStats;

/// Lazily allocated, mutex-guarded LRU of [`ByteView`]s
pub struct SyncCache {
    cache_bytes: u64,
    lru: Mutex<Option<LruCache<ByteView>>>,
    stats: Arc<GroupStats>,
}

impl SyncCache {
    /// Create a wrapper with a byte budget (0 = unbounded)
    pub fn new(cache_bytes: u64, stats: Arc<GroupStats>) -> Self {
        Self {
            cache_bytes,
            lru: Mutex::new(None),
            stats,
        }
    }

    /// Insert a value, allocating the cache on first use
    pub fn add(&self, key: &str, value: ByteView) {
        let mut guard = self.lru.lock();
        let lru = guard.get_or_insert_with(|| {
            let stats = Arc::clone(&self.stats);
            LruCache::with_eviction_callback(self.cache_bytes, move |_: &str, _: &ByteView| {
                stats.record_eviction();
            })
        });
        lru.add(key, value);
    }

    /// Look up a value, promoting it to most recently used
    pub fn get(&self, key: &str) -> Option<ByteView> {
        let mut guard = self.lru.lock();
        guard.as_mut()?.get(key).cloned()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.lru.lock().as_ref().map_or(0, LruCache::len)
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by keys and values
    pub fn size_bytes(&self) -> u64 {
        self.lru.lock().as_ref().map_or(0, LruCache::bytes)
    }

    /// Configured byte budget
    pub fn capacity(&self) -> u64 {
        self.cache_bytes
    }

    /// Whether the underlying cache has been allocated yet
    pub fn is_allocated(&self) -> bool {
        self.lru.lock().is_some()
    }
}

impl std::fmt::Debug for SyncCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCache")
            .field("cache_bytes", &self.cache_bytes)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}
