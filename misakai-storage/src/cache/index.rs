use super::CacheCore;
use super::state::{CacheState, IndexTable, Resolved};
use crate::core::types::{CacheEntry, StatsCounters};
use crate::core::{Expected, PrimaryKey};
use std::any::Any;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Derives a secondary key from a value
pub type KeyFn<K, V> = dyn Fn(&V) -> Option<K> + Send + Sync;

/// Fetches a value from the backing store on a cache miss
pub type LoaderFn<K, V> = dyn Fn(&K) -> anyhow::Result<Option<V>> + Send + Sync;

/// Secondary key to primary key mapping for one index
pub(crate) struct KeyTable<K, V> {
    name: String,
    key_of: Arc<KeyFn<K, V>>,
    map: HashMap<K, PrimaryKey>,
}

impl<K, V> KeyTable<K, V>
where
    K: Eq + Hash,
{
    pub fn new(name: &str, key_of: Arc<KeyFn<K, V>>) -> Self {
        Self {
            name: name.to_string(),
            key_of,
            map: HashMap::new(),
        }
    }

    pub fn primary_key<Q>(&self, key: &Q) -> Option<PrimaryKey>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).copied()
    }

    pub fn link(&mut self, key: K, primary_key: PrimaryKey) {
        self.map.insert(key, primary_key);
    }

    /// Remove `key` only if it still points at `primary_key`
    pub fn unlink<Q>(&mut self, key: &Q, primary_key: PrimaryKey) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.primary_key(key) == Some(primary_key) {
            self.map.remove(key);
            true
        } else {
            false
        }
    }
}

impl<K, V> IndexTable<V> for KeyTable<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, value: &V, primary_key: PrimaryKey) {
        if let Some(key) = (self.key_of)(value) {
            self.map.insert(key, primary_key);
        }
    }

    fn retain_live(&mut self, entries: &HashMap<PrimaryKey, CacheEntry<V>>) -> usize {
        let before = self.map.len();
        self.map.retain(|_, pk| entries.contains_key(pk));
        before - self.map.len()
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Result of checking the cache without loading
enum Peek<V> {
    Hit(Arc<V>),
    Miss,
    Stale(PrimaryKey),
}

/// A secondary index over an [`LruCache`](super::LruCache).
///
/// The index owns no values. It maps its keys to primary keys inside the
/// shared cache state and falls back to its loader on a miss. Clones share
/// the same underlying index.
pub struct Index<K, V> {
    name: Arc<str>,
    slot: usize,
    core: Arc<CacheCore<V>>,
    loader: Arc<LoaderFn<K, V>>,
}

impl<K, V> Clone for Index<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            slot: self.slot,
            core: Arc::clone(&self.core),
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<K, V> fmt::Debug for Index<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("slot", &self.slot)
            .finish()
    }
}

impl<K, V> Index<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(
        name: &str,
        slot: usize,
        core: Arc<CacheCore<V>>,
        loader: Arc<LoaderFn<K, V>>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            slot,
            core,
            loader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a value, loading it from the backing store on a miss.
    ///
    /// The loader runs with no cache lock held. When two threads miss on the
    /// same key, both load, the first to insert wins and the other value is
    /// discarded. Absent values and loader faults leave the cache untouched.
    pub fn lookup<Q>(&self, key: &Q) -> Expected<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        let stale = match self.peek(key)? {
            Peek::Hit(value) => {
                debug!("Cache HIT index='{}' key={:?}", self.name, key);
                return Ok(Some(value));
            }
            Peek::Miss => None,
            Peek::Stale(pk) => Some(pk),
        };

        StatsCounters::bump(&self.core.stats.misses);
        debug!("Cache MISS index='{}' key={:?}", self.name, key);

        let owned = key.to_owned();
        let loaded = match (self.loader)(&owned) {
            Ok(Some(value)) => value,
            Ok(None) => {
                if let Some(pk) = stale {
                    self.forget_stale(key, pk)?;
                }
                return Ok(None);
            }
            Err(err) => return Err(self.core.load_failed(&self.name, &err)),
        };

        StatsCounters::bump(&self.core.stats.loads);
        let view = self.core.admit(Some((self.slot, owned)), loaded)?;
        Ok(Some(view.value))
    }

    /// Look up a value in the cache only. A hit refreshes recency; a miss
    /// does not call the loader.
    pub fn cached<Q>(&self, key: &Q) -> Expected<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.peek(key)? {
            Peek::Hit(value) => Ok(Some(value)),
            Peek::Miss | Peek::Stale(_) => Ok(None),
        }
    }

    /// Number of keys currently mapped, stale ones included
    pub fn mapped_keys(&self) -> crate::core::Result<usize> {
        let scope = self.core.lock.shared().map_err(|e| self.core.fault(e))?;
        let state: &CacheState<V> = scope.get()?;
        Ok(state.table::<K>(self.slot)?.len())
    }

    fn peek<Q>(&self, key: &Q) -> crate::core::Result<Peek<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let scope = self.core.lock.shared().map_err(|e| self.core.fault(e))?;
        let state = scope.get()?;

        let peeked = match state.resolve::<K, Q>(self.slot, key)? {
            Resolved::Live(entry) => {
                entry.touch(self.core.now(), self.core.next_tick());
                StatsCounters::bump(&self.core.stats.hits);
                Peek::Hit(Arc::clone(&entry.value))
            }
            Resolved::Stale(pk) => Peek::Stale(pk),
            Resolved::Unmapped => Peek::Miss,
        };
        Ok(peeked)
    }

    fn forget_stale<Q>(&self, key: &Q, pk: PrimaryKey) -> crate::core::Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut scope = self.core.lock.write().map_err(|e| self.core.fault(e))?;
        let state = scope.get_mut()?;
        if !state.entries.contains_key(&pk) && state.table_mut::<K>(self.slot)?.unlink(key, pk) {
            debug!("Dropped stale mapping in index '{}'", self.name);
        }
        Ok(())
    }
}
