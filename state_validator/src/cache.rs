//! Bounded, expiring caches fronting the store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::H256;
use lru::LruCache;
use parking_lot::Mutex;

use crate::store::{ContentStore, StoreError};

/// Sizing of one cache instance.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// Upper bound on the summed size of cached blobs, in bytes.
    pub max_bytes: usize,
    /// How long an entry may be served before it is considered stale.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 16 * 1000 * 1000, // 16MB
            ttl: Duration::from_secs(8 * 60 * 60), // 8 hours
        }
    }
}

/// Hit/miss counters of one cache instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that fell through to the store.
    pub misses: u64,
    /// Entries dropped to stay within the byte budget.
    pub evictions: u64,
}

struct CacheEntry {
    data: Bytes,
    inserted_at: Instant,
}

struct CacheInner {
    entries: LruCache<H256, CacheEntry>,
    bytes: usize,
    stats: CacheStats,
}

/// A byte-bounded, time-expiring `hash → blob` cache.
///
/// Eviction is least-recently-used once the byte budget is exceeded; expired
/// entries are dropped lazily on access. Absence is never cached: a miss
/// always reaches the backing store.
pub struct ByteLruCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
}

// Each entry costs its blob plus the key and bookkeeping.
const ENTRY_OVERHEAD: usize = 64;

impl ByteLruCache {
    /// Creates a cache with the given sizing.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                bytes: 0,
                stats: CacheStats::default(),
            }),
            config,
        }
    }

    /// Fetches a blob, promoting it to most recently used.
    pub fn get(&self, key: H256) -> Option<Bytes> {
        enum Lookup {
            Absent,
            Expired,
            Fresh(Bytes),
        }

        let mut inner = self.inner.lock();
        let lookup = match inner.entries.get(&key) {
            None => Lookup::Absent,
            Some(entry) if entry.inserted_at.elapsed() > self.config.ttl => Lookup::Expired,
            Some(entry) => Lookup::Fresh(entry.data.clone()),
        };

        match lookup {
            Lookup::Absent => {
                inner.stats.misses += 1;
                None
            }
            Lookup::Expired => {
                if let Some(entry) = inner.entries.pop(&key) {
                    inner.bytes -= entry.data.len() + ENTRY_OVERHEAD;
                }
                inner.stats.misses += 1;
                None
            }
            Lookup::Fresh(data) => {
                inner.stats.hits += 1;
                Some(data)
            }
        }
    }

    /// Returns whether a fresh entry exists, without promoting it.
    pub fn contains(&self, key: H256) -> bool {
        let inner = self.inner.lock();
        matches!(
            inner.entries.peek(&key),
            Some(entry) if entry.inserted_at.elapsed() <= self.config.ttl
        )
    }

    /// Inserts a blob, evicting least-recently-used entries as needed.
    /// Blobs larger than the whole budget are not cached.
    pub fn insert(&self, key: H256, data: Bytes) {
        let cost = data.len() + ENTRY_OVERHEAD;
        if cost > self.config.max_bytes {
            return;
        }

        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.put(
            key,
            CacheEntry {
                data,
                inserted_at: Instant::now(),
            },
        ) {
            inner.bytes -= old.data.len() + ENTRY_OVERHEAD;
        }
        inner.bytes += cost;

        while inner.bytes > self.config.max_bytes {
            match inner.entries.pop_lru() {
                None => break,
                Some((_, evicted)) => {
                    inner.bytes -= evicted.data.len() + ENTRY_OVERHEAD;
                    inner.stats.evictions += 1;
                }
            }
        }
    }

    /// A snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// The summed size of currently cached blobs plus overhead, in bytes.
    pub fn bytes(&self) -> usize {
        self.inner.lock().bytes
    }
}

impl std::fmt::Debug for ByteLruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteLruCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// A store wrapper serving reads through a [`ByteLruCache`].
pub struct CachedStore {
    inner: Arc<dyn ContentStore>,
    cache: Arc<ByteLruCache>,
}

impl CachedStore {
    /// Wraps `inner` with `cache`.
    pub fn new(inner: Arc<dyn ContentStore>, cache: Arc<ByteLruCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl ContentStore for CachedStore {
    async fn get(&self, key: H256) -> Result<Option<Bytes>, StoreError> {
        if let Some(data) = self.cache.get(key) {
            return Ok(Some(data));
        }

        let fetched = self.inner.get(key).await?;
        if let Some(data) = &fetched {
            self.cache.insert(key, data.clone());
        }
        Ok(fetched)
    }

    async fn has(&self, key: H256) -> Result<bool, StoreError> {
        if self.cache.contains(key) {
            return Ok(true);
        }
        self.inner.has(key).await
    }
}
