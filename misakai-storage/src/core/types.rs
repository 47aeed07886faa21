use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Canonical identity of a cached value
pub type PrimaryKey = u64;

/// Cached value with its bookkeeping.
///
/// Recency lives in atomics so a hit can be recorded under a shared read.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
    pub primary_key: PrimaryKey,
    pub value: Arc<V>,
    pub inserted_at: Duration,
    last_accessed_nanos: AtomicU64,
    access_tick: AtomicU64,
}

impl<V> CacheEntry<V> {
    pub fn new(primary_key: PrimaryKey, value: Arc<V>, now: Duration, tick: u64) -> Self {
        Self {
            primary_key,
            value,
            inserted_at: now,
            last_accessed_nanos: AtomicU64::new(as_nanos(now)),
            access_tick: AtomicU64::new(tick),
        }
    }

    /// Record an access
    pub fn touch(&self, now: Duration, tick: u64) {
        self.last_accessed_nanos
            .fetch_max(as_nanos(now), Ordering::Relaxed);
        self.access_tick.fetch_max(tick, Ordering::Relaxed);
    }

    pub fn last_accessed_at(&self) -> Duration {
        Duration::from_nanos(self.last_accessed_nanos.load(Ordering::Relaxed))
    }

    /// Position in the global access order; larger is more recent
    pub fn access_tick(&self) -> u64 {
        self.access_tick.load(Ordering::Relaxed)
    }

    /// Time since the last access
    pub fn idle(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_accessed_at())
    }

    pub fn view(&self) -> EntryView<V> {
        EntryView {
            primary_key: self.primary_key,
            value: Arc::clone(&self.value),
            inserted_at: self.inserted_at,
            last_accessed_at: self.last_accessed_at(),
        }
    }
}

fn as_nanos(at: Duration) -> u64 {
    u64::try_from(at.as_nanos()).unwrap_or(u64::MAX)
}

/// Snapshot of a live entry
#[derive(Debug, Clone)]
pub struct EntryView<V> {
    pub primary_key: PrimaryKey,
    pub value: Arc<V>,
    /// Clock reading when the entry was created
    pub inserted_at: Duration,
    /// Clock reading of the most recent hit
    pub last_accessed_at: Duration,
}

/// Counters updated on the lookup paths
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub loads: AtomicU64,
    pub load_failures: AtomicU64,
    pub collisions: AtomicU64,
    pub evictions: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for a cache
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of live entries
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that went to the backing store
    pub misses: u64,
    /// Values the backing store returned
    pub loads: u64,
    /// Loader calls that raised
    pub load_failures: u64,
    /// Loaded values discarded because another thread inserted first
    pub collisions: u64,
    /// Entries removed by sweeps
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
