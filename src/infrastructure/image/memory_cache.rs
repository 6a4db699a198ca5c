//! In-memory LRU payload cache bounded by total byte size.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::DecodeSignature;
use crate::domain::ports::PayloadCachePort;

/// Default byte budget for decoded payloads.
pub const DEFAULT_MEMORY_BUDGET: u64 = 16 * 1024 * 1024;

struct CacheEntry<P> {
    payload: P,
    byte_size: u64,
}

struct CacheState<P> {
    entries: LruCache<DecodeSignature, CacheEntry<P>>,
    total_bytes: u64,
    budget: u64,
}

impl<P> CacheState<P> {
    /// Pops least recently used entries until the total fits the budget.
    fn evict_to_budget(&mut self) -> u64 {
        let mut evicted = 0;
        while self.total_bytes > self.budget {
            let Some((signature, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= entry.byte_size;
            evicted += 1;
            debug!(
                signature = %signature,
                bytes = entry.byte_size,
                total = self.total_bytes,
                "Evicted payload from memory cache"
            );
        }
        evicted
    }
}

/// LRU cache of decoded payloads keyed by [`DecodeSignature`].
///
/// Byte sizes are supplied by the caller. The running total always equals the
/// sum of the sizes of the entries currently present.
pub struct LruPayloadCache<P> {
    state: Mutex<CacheState<P>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<P: Clone> LruPayloadCache<P> {
    /// Creates a new cache with the given byte budget.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                budget,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default byte budget.
    #[must_use]
    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }

    /// Looks up a payload without promoting it in the LRU order.
    pub fn peek(&self, signature: &DecodeSignature) -> Option<P> {
        let state = self.state.lock();
        state.entries.peek(signature).map(|e| e.payload.clone())
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let state = self.state.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: state.entries.len(),
            bytes: state.total_bytes,
            budget: state.budget,
        }
    }
}

impl<P: Clone> Default for LruPayloadCache<P> {
    fn default() -> Self {
        Self::with_default_budget()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Entries removed to satisfy the budget.
    pub evictions: u64,
    /// Current number of cached payloads.
    pub entries: usize,
    /// Current total byte size.
    pub bytes: u64,
    /// Configured byte budget.
    pub budget: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} payloads, {}/{} bytes, {:.1}% hit rate ({} hits, {} misses, {} evictions)",
            self.entries,
            self.bytes,
            self.budget,
            self.hit_rate,
            self.hits,
            self.misses,
            self.evictions
        )
    }
}

impl<P: Clone + Send> PayloadCachePort<P> for LruPayloadCache<P> {
    fn get(&self, signature: &DecodeSignature) -> Option<P> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(signature) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(signature = %signature, "Memory cache hit");
            Some(entry.payload.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(signature = %signature, "Memory cache miss");
            None
        }
    }

    fn put(&self, signature: DecodeSignature, payload: P, byte_size: u64) {
        let mut state = self.state.lock();
        debug!(signature = %signature, bytes = byte_size, "Storing payload in memory cache");
        if let Some(previous) = state
            .entries
            .put(signature, CacheEntry { payload, byte_size })
        {
            state.total_bytes -= previous.byte_size;
        }
        state.total_bytes += byte_size;
        let evicted = state.evict_to_budget();
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    fn set_maximum_size(&self, bytes: u64) {
        let mut state = self.state.lock();
        debug!(budget = bytes, "Resizing memory cache");
        state.budget = bytes;
        let evicted = state.evict_to_budget();
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_bytes = 0;
        debug!("Cleared memory payload cache");
    }

    fn size(&self) -> u64 {
        self.state.lock().total_bytes
    }

    fn count(&self) -> usize {
        self.state.lock().entries.len()
    }
}
