//! Shared record cache.
//!
//! A bounded LRU cache sitting between record loads and RocksDB. Whether a
//! load reads from or writes to it is decided by the caller's [`CacheMode`].

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use massindex_types::{CacheMode, EntityType, PrimaryKey, Record};

/// Default number of cached records
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

struct Inner {
    entries: LruCache<(EntityType, PrimaryKey), Record>,
    hits: u64,
    misses: u64,
}

/// LRU cache of loaded records keyed by type and primary key.
pub struct RecordCache {
    inner: Mutex<Inner>,
}

impl RecordCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Look up a record if `mode` allows cache reads.
    pub fn get(&self, mode: CacheMode, entity_type: &EntityType, key: PrimaryKey) -> Option<Record> {
        if !mode.reads_cache() {
            return None;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let found = inner.entries.get(&(entity_type.clone(), key)).cloned();
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Store a freshly loaded record if `mode` allows cache writes.
    ///
    /// `Put` leaves existing entries alone; `Normal` and `Refresh` overwrite.
    pub fn put(&self, mode: CacheMode, record: &Record) {
        if !mode.writes_cache() {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let cache_key = (record.entity_type.clone(), record.key);
        if mode == CacheMode::Put && inner.entries.contains(&cache_key) {
            return;
        }
        inner.entries.put(cache_key, record.clone());
    }

    /// Drop a cached record, used when the record is rewritten.
    pub fn invalidate(&self, entity_type: &EntityType, key: PrimaryKey) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.pop(&(entity_type.clone(), key));
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            len: inner.entries.len(),
        }
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
