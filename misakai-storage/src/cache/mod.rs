//! Cache Module
//!
//! Indexed LRU cache with lazy population:
//! - [`LruCache`]: the shared entry set, eviction sweep and index registry
//! - [`Index`]: a secondary key over the entry set with a backing-store loader
//!
//! One [`UpgradableLock`] guards the entries and every index table, so a
//! lookup always sees entries and mappings that agree with each other.

pub mod index;
mod state;

pub use index::{Index, KeyFn, LoaderFn};

use crate::config::CacheConfig;
use crate::core::types::{CacheEntry, StatsCounters};
use crate::core::{
    CacheError, CacheStats, Clock, EntryView, FaultSink, PrimaryKey, Result, SystemClock,
    UpgradableLock,
};
use state::{CacheState, IndexTable, Resolved, SweepPolicy};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extracts the primary key of a value
pub type PrimaryKeyFn<V> = dyn Fn(&V) -> PrimaryKey + Send + Sync;

/// State shared by a cache and all of its indices
pub(crate) struct CacheCore<V> {
    pub(crate) lock: UpgradableLock<CacheState<V>>,
    pub(crate) stats: StatsCounters,
    config: CacheConfig,
    primary_key: Arc<PrimaryKeyFn<V>>,
    clock: Arc<dyn Clock>,
    sink: FaultSink,
    tick: AtomicU64,
    live: AtomicUsize,
}

impl<V: Send + Sync + 'static> CacheCore<V> {
    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Next position in the global access order
    pub(crate) fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Log a fault once and hand it to the sink
    pub(crate) fn fault(&self, err: CacheError) -> CacheError {
        warn!("Cache fault: {}", err);
        self.sink.notify(&err);
        err
    }

    /// Count a failed backing-store call and report it
    pub(crate) fn load_failed(&self, index: &str, err: &anyhow::Error) -> CacheError {
        StatsCounters::bump(&self.stats.load_failures);
        self.fault(CacheError::backing_store(index, err))
    }

    fn policy(&self) -> SweepPolicy {
        SweepPolicy {
            capacity: self.config.capacity,
            min_age: self.config.min_age(),
            max_age: self.config.max_age(),
        }
    }

    /// Insert a freshly loaded value unless an entry for it already exists.
    ///
    /// `via` is the index slot and key the value was loaded through. Returns
    /// the live entry, which is the existing one when another thread won.
    pub(crate) fn admit<K>(&self, via: Option<(usize, K)>, value: V) -> Result<EntryView<V>>
    where
        K: Eq + Hash + Send + Sync + 'static,
    {
        let primary_key = (self.primary_key)(&value);
        let mut scope = self.lock.read().map_err(|e| self.fault(e))?;

        // Re-check under the upgradable read; loads run unlocked
        let (winner, linked) = {
            let state = scope.get()?;
            let through_index = match &via {
                Some((slot, key)) => match state.resolve::<K, K>(*slot, key)? {
                    Resolved::Live(entry) => Some(entry.primary_key),
                    Resolved::Stale(_) | Resolved::Unmapped => None,
                },
                None => None,
            };
            let linked = through_index.is_some();
            let winner = through_index.or_else(|| {
                state
                    .entries
                    .contains_key(&primary_key)
                    .then_some(primary_key)
            });
            (winner, linked)
        };

        if let Some(target) = winner {
            let collided = via.is_some();
            if let (Some((slot, key)), false) = (via, linked) {
                match scope.with_write(|state| {
                    state
                        .table_mut::<K>(slot)
                        .map(|table| table.link(key, target))
                }) {
                    Ok(result) => result?,
                    Err(err) => {
                        drop(scope);
                        return Err(self.fault(err));
                    }
                }
            }
            if collided {
                StatsCounters::bump(&self.stats.collisions);
            }

            let view = scope
                .get()?
                .entries
                .get(&target)
                .map(|entry| {
                    entry.touch(self.now(), self.next_tick());
                    entry.view()
                })
                .ok_or_else(|| {
                    CacheError::InternalError(format!("entry {target} missing under read lock"))
                })?;
            debug!(
                "Cache entry {} already present, discarding loaded value",
                target
            );
            return Ok(view);
        }

        if let Err(err) = scope.acquire_write() {
            drop(scope);
            return Err(self.fault(err));
        }
        let now = self.now();
        let state = scope.get_mut()?;

        let entry = CacheEntry::new(primary_key, Arc::new(value), now, self.next_tick());
        let view = entry.view();
        state.insert(entry);
        if let Some((slot, key)) = via {
            state.table_mut::<K>(slot)?.link(key, primary_key);
        }
        debug!("Cache PUT: {}", primary_key);

        let evicted = state.sweep(now, self.policy());
        self.live.store(state.entries.len(), Ordering::Relaxed);
        scope.release();

        self.record_evictions(&evicted);
        Ok(view)
    }

    fn sweep(&self) -> Result<usize> {
        let mut scope = self.lock.write().map_err(|e| self.fault(e))?;
        let state = scope.get_mut()?;

        let evicted = state.sweep(self.now(), self.policy());
        self.live.store(state.entries.len(), Ordering::Relaxed);
        drop(scope);

        self.record_evictions(&evicted);
        Ok(evicted.len())
    }

    fn record_evictions(&self, evicted: &[PrimaryKey]) {
        if evicted.is_empty() {
            return;
        }
        StatsCounters::add(&self.stats.evictions, evicted.len());
        debug!("Cache EVICT: {:?}", evicted);
    }
}

/// In-memory cache of values keyed by a numeric primary key.
///
/// Entries are created only when an index loads a missing value (or through
/// [`LruCache::put`]) and removed only by sweeps. A sweep runs after every
/// insertion and evicts:
/// - entries idle longer than `max_age`, always;
/// - while over `capacity`, the least recently accessed entries that have
///   been idle for at least `min_age`.
///
/// Entries accessed within `min_age` are never evicted for capacity, so the
/// cache may hold more than `capacity` entries for a while.
///
/// Cloning is cheap and shares the same cache.
pub struct LruCache<V> {
    core: Arc<CacheCore<V>>,
}

impl<V> Clone for LruCache<V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V> fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("config", &self.core.config)
            .field("entries", &self.core.live.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V: Send + Sync + 'static> LruCache<V> {
    /// Create a cache on the system clock with no fault listeners
    pub fn new<P>(config: CacheConfig, primary_key: P) -> Result<Self>
    where
        P: Fn(&V) -> PrimaryKey + Send + Sync + 'static,
    {
        Self::with_parts(
            config,
            primary_key,
            Arc::new(SystemClock::new()),
            FaultSink::new(),
        )
    }

    /// Create a cache with an explicit clock and fault sink
    pub fn with_parts<P>(
        config: CacheConfig,
        primary_key: P,
        clock: Arc<dyn Clock>,
        sink: FaultSink,
    ) -> Result<Self>
    where
        P: Fn(&V) -> PrimaryKey + Send + Sync + 'static,
    {
        config.validate()?;
        info!(
            "Initializing cache with capacity={}, min_age={:?}, max_age={:?}",
            config.capacity,
            config.min_age(),
            config.max_age()
        );

        let lock = UpgradableLock::with_timeout(CacheState::new(), config.lock_timeout());
        Ok(Self {
            core: Arc::new(CacheCore {
                lock,
                stats: StatsCounters::default(),
                config,
                primary_key: Arc::new(primary_key),
                clock,
                sink,
                tick: AtomicU64::new(0),
                live: AtomicUsize::new(0),
            }),
        })
    }

    /// Register a secondary index over the entry set.
    ///
    /// Meant for setup, before lookups start. Values already cached are
    /// indexed immediately.
    pub fn add_index<K, F, L>(&self, name: &str, key_of: F, loader: L) -> Result<Index<K, V>>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        F: Fn(&V) -> Option<K> + Send + Sync + 'static,
        L: Fn(&K) -> anyhow::Result<Option<V>> + Send + Sync + 'static,
    {
        let mut scope = self.core.lock.write()?;
        let state = scope.get_mut()?;

        let mut table = index::KeyTable::new(name, Arc::new(key_of));
        for entry in state.entries.values() {
            table.register(&entry.value, entry.primary_key);
        }
        let slot = state.tables.len();
        state.tables.push(Box::new(table));
        drop(scope);

        info!("Registered cache index '{}' (slot {})", name, slot);
        Ok(Index::new(name, slot, Arc::clone(&self.core), Arc::new(loader)))
    }

    /// Fetch a live entry by primary key, refreshing its recency
    pub fn get(&self, primary_key: PrimaryKey) -> Result<Option<EntryView<V>>> {
        let core = &self.core;
        let scope = core.lock.shared().map_err(|e| core.fault(e))?;
        let state = scope.get()?;

        Ok(state.entries.get(&primary_key).map(|entry| {
            entry.touch(core.now(), core.next_tick());
            entry.view()
        }))
    }

    /// Insert a value, or return the live entry if its primary key is
    /// already cached. Triggers a sweep when a new entry is added.
    pub fn put(&self, value: V) -> Result<EntryView<V>> {
        self.core.admit::<PrimaryKey>(None, value)
    }

    /// Run the eviction policy now. Returns the number of evicted entries.
    pub fn sweep(&self) -> Result<usize> {
        self.core.sweep()
    }

    /// Whether a live entry exists, without touching its recency
    pub fn contains(&self, primary_key: PrimaryKey) -> Result<bool> {
        let scope = self.core.lock.shared().map_err(|e| self.core.fault(e))?;
        Ok(scope.get()?.entries.contains_key(&primary_key))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.core.live.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.core.stats.snapshot(self.len())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    pub fn sink(&self) -> &FaultSink {
        &self.core.sink
    }

    /// Sweep periodically on the current tokio runtime.
    ///
    /// The task stops on its own once every handle to the cache is dropped.
    /// Fails when called outside a runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> Result<tokio::task::JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            CacheError::InvalidConfig(
                "periodic sweep requires a running tokio runtime".to_string(),
            )
        })?;
        info!("Starting cache sweeper (interval={:?})", interval);

        let core: Weak<CacheCore<V>> = Arc::downgrade(&self.core);
        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(core) = core.upgrade() else {
                    debug!("Cache dropped, stopping sweeper");
                    break;
                };
                // Faults are already logged and reported by the core
                let _ = core.sweep();
            }
        }))
    }

    /// Report a fault raised outside an index lookup
    pub(crate) fn load_failed(&self, index: &str, err: &anyhow::Error) -> CacheError {
        self.core.load_failed(index, err)
    }
}
