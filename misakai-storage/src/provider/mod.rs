//! Entity providers backed by the cache
//!
//! A [`CacheProvider`] puts an [`LruCache`] in front of a [`BackingStore`]
//! and exposes the entity lookups: by primary key (`oid`) and by unique tag.

use crate::cache::{Index, LruCache};
use crate::config::CacheConfig;
use crate::core::{Clock, Expected, FaultSink, PrimaryKey, Result, SystemClock};
use std::sync::Arc;
use tracing::info;

/// A storable object with a numeric identity and an optional unique tag
pub trait Entity: Send + Sync + 'static {
    fn oid(&self) -> PrimaryKey;

    fn tag(&self) -> Option<&str>;

    fn set_tag(&mut self, tag: &str);
}

/// System of record consulted on cache misses.
///
/// Fetches are called with no cache lock held and may block. "Not found" is
/// `Ok(None)`; `Err` is reserved for real faults.
pub trait BackingStore<V>: Send + Sync {
    fn fetch_by_key(&self, key: PrimaryKey) -> anyhow::Result<Option<V>>;

    fn fetch_by_tag(&self, tag: &str) -> anyhow::Result<Option<V>>;

    /// Every value carrying `tag`. Defaults to the single-value fetch.
    fn fetch_many_by_tag(&self, tag: &str) -> anyhow::Result<Vec<V>> {
        Ok(self.fetch_by_tag(tag)?.into_iter().collect())
    }
}

/// Result of [`CacheProvider::get_or_create`]
#[derive(Debug)]
pub enum Resolved<V> {
    /// Found in the cache or the backing store
    Existing(Arc<V>),
    /// Built locally; not cached and not yet persisted
    Created(V),
}

impl<V> Resolved<V> {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_arc(self) -> Arc<V> {
        match self {
            Self::Existing(value) => value,
            Self::Created(value) => Arc::new(value),
        }
    }
}

/// Cached access to entities of one type
pub struct CacheProvider<V> {
    store: Arc<dyn BackingStore<V>>,
    cache: LruCache<V>,
    by_key: Index<PrimaryKey, V>,
    by_tag: Index<String, V>,
}

impl<V> Clone for CacheProvider<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
            by_key: self.by_key.clone(),
            by_tag: self.by_tag.clone(),
        }
    }
}

impl<V: Entity> CacheProvider<V> {
    /// Default ages (20s protected, 30min idle limit) with the given capacity
    pub fn with_capacity<S>(store: S, capacity: usize) -> Result<Self>
    where
        S: BackingStore<V> + 'static,
    {
        Self::new(Arc::new(store), CacheConfig::new(capacity), FaultSink::new())
    }

    pub fn new(
        store: Arc<dyn BackingStore<V>>,
        config: CacheConfig,
        sink: FaultSink,
    ) -> Result<Self> {
        Self::with_clock(store, config, sink, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        store: Arc<dyn BackingStore<V>>,
        config: CacheConfig,
        sink: FaultSink,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let cache = LruCache::with_parts(config, |value: &V| value.oid(), clock, sink)?;

        let keys = Arc::clone(&store);
        let by_key = cache.add_index(
            "oid",
            |value: &V| Some(value.oid()),
            move |key: &PrimaryKey| keys.fetch_by_key(*key),
        )?;

        let tags = Arc::clone(&store);
        let by_tag = cache.add_index(
            "tag",
            |value: &V| value.tag().map(str::to_string),
            move |tag: &String| tags.fetch_by_tag(tag),
        )?;

        info!("Cache provider ready (capacity={})", cache.config().capacity);
        Ok(Self {
            store,
            cache,
            by_key,
            by_tag,
        })
    }

    /// Get an entity by primary key from the cache or the backing store
    pub fn get_by_key(&self, key: PrimaryKey) -> Expected<Arc<V>> {
        self.by_key.lookup(&key)
    }

    /// Get an entity by tag from the cache or the backing store
    pub fn get_by_tag(&self, tag: &str) -> Expected<Arc<V>> {
        self.by_tag.lookup(tag)
    }

    /// Get every entity found for `keys`, in key order. Missing keys are
    /// skipped; the first fault aborts the batch.
    pub fn get_many_by_key(&self, keys: &[PrimaryKey]) -> Result<Vec<Arc<V>>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get_by_key(*key)? {
                found.push(value);
            }
        }
        Ok(found)
    }

    /// Get every entity carrying `tag` from the backing store.
    ///
    /// Always asks the store, since the cache cannot tell whether it holds
    /// all of them. Fetched values go through the cache, so an entity that is
    /// already cached comes back as the cached instance.
    pub fn get_many_by_tag(&self, tag: &str) -> Result<Vec<Arc<V>>> {
        let fetched = self
            .store
            .fetch_many_by_tag(tag)
            .map_err(|err| self.cache.load_failed(self.by_tag.name(), &err))?;

        fetched
            .into_iter()
            .map(|value| self.cache.put(value).map(|view| view.value))
            .collect()
    }

    /// Get an entity by key, or build one locally when none exists.
    ///
    /// The built value is neither cached nor persisted.
    pub fn get_or_create<F>(&self, key: PrimaryKey, construct: F) -> Result<Resolved<V>>
    where
        F: FnOnce(PrimaryKey) -> V,
    {
        Ok(match self.get_by_key(key)? {
            Some(value) => Resolved::Existing(value),
            None => Resolved::Created(construct(key)),
        })
    }

    /// Get an entity by tag, or build one carrying that tag.
    ///
    /// The built value is neither cached nor persisted.
    pub fn get_or_create_by_tag<F>(&self, tag: &str, construct: F) -> Result<Resolved<V>>
    where
        F: FnOnce(&str) -> V,
    {
        Ok(match self.get_by_tag(tag)? {
            Some(value) => Resolved::Existing(value),
            None => {
                let mut value = construct(tag);
                value.set_tag(tag);
                Resolved::Created(value)
            }
        })
    }

    pub fn cache(&self) -> &LruCache<V> {
        &self.cache
    }

    /// Start the periodic sweep if the configuration asks for one.
    ///
    /// Needs a running tokio runtime when a sweep interval is set.
    pub fn start_sweeper(&self) -> Result<Option<tokio::task::JoinHandle<()>>> {
        self.cache
            .config()
            .sweep_interval()
            .map(|interval| self.cache.spawn_sweeper(interval))
            .transpose()
    }
}
