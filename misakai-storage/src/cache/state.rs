use crate::core::types::CacheEntry;
use crate::core::{CacheError, PrimaryKey, Result};
use std::any::Any;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use super::index::KeyTable;

/// Secondary-key table stored alongside the entries, behind the cache lock
pub(crate) trait IndexTable<V>: Send + Sync {
    fn name(&self) -> &str;

    /// Map the value's secondary key (if it has one) to `primary_key`
    fn register(&mut self, value: &V, primary_key: PrimaryKey);

    /// Drop mappings whose entry is gone; returns how many were dropped
    fn retain_live(&mut self, entries: &HashMap<PrimaryKey, CacheEntry<V>>) -> usize;

    fn len(&self) -> usize;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Where a secondary key leads
pub(crate) enum Resolved<'a, V> {
    Live(&'a CacheEntry<V>),
    /// Mapped, but the entry was evicted
    Stale(PrimaryKey),
    Unmapped,
}

/// Eviction limits applied by a sweep
#[derive(Debug, Clone, Copy)]
pub(crate) struct SweepPolicy {
    pub capacity: usize,
    pub min_age: Duration,
    pub max_age: Duration,
}

/// Everything guarded by the cache lock
pub(crate) struct CacheState<V> {
    pub entries: HashMap<PrimaryKey, CacheEntry<V>>,
    pub tables: Vec<Box<dyn IndexTable<V>>>,
}

impl<V: Send + Sync + 'static> CacheState<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            tables: Vec::new(),
        }
    }

    pub fn table<K>(&self, slot: usize) -> Result<&KeyTable<K, V>>
    where
        K: Eq + Hash + Send + Sync + 'static,
    {
        self.tables
            .get(slot)
            .and_then(|table| table.as_any().downcast_ref::<KeyTable<K, V>>())
            .ok_or_else(|| slot_mismatch(slot))
    }

    pub fn table_mut<K>(&mut self, slot: usize) -> Result<&mut KeyTable<K, V>>
    where
        K: Eq + Hash + Send + Sync + 'static,
    {
        self.tables
            .get_mut(slot)
            .and_then(|table| table.as_any_mut().downcast_mut::<KeyTable<K, V>>())
            .ok_or_else(|| slot_mismatch(slot))
    }

    /// Follow a secondary key to its entry
    pub fn resolve<K, Q>(&self, slot: usize, key: &Q) -> Result<Resolved<'_, V>>
    where
        K: Borrow<Q> + Eq + Hash + Send + Sync + 'static,
        Q: Hash + Eq + ?Sized,
    {
        let table = self.table::<K>(slot)?;
        Ok(match table.primary_key(key) {
            Some(pk) => match self.entries.get(&pk) {
                Some(entry) => Resolved::Live(entry),
                None => Resolved::Stale(pk),
            },
            None => Resolved::Unmapped,
        })
    }

    /// Add an entry and index it in every table
    pub fn insert(&mut self, entry: CacheEntry<V>) {
        for table in &mut self.tables {
            table.register(&entry.value, entry.primary_key);
        }
        self.entries.insert(entry.primary_key, entry);
    }

    /// Apply the age and capacity policy. Returns the evicted keys, oldest
    /// access first for capacity evictions.
    pub fn sweep(&mut self, now: Duration, policy: SweepPolicy) -> Vec<PrimaryKey> {
        let mut evicted: Vec<PrimaryKey> = self
            .entries
            .values()
            .filter(|entry| entry.idle(now) > policy.max_age)
            .map(|entry| entry.primary_key)
            .collect();
        for pk in &evicted {
            self.entries.remove(pk);
        }

        if self.entries.len() > policy.capacity {
            let mut candidates: Vec<(Duration, u64, PrimaryKey)> = self
                .entries
                .values()
                .filter(|entry| entry.idle(now) >= policy.min_age)
                .map(|entry| {
                    (
                        entry.last_accessed_at(),
                        entry.access_tick(),
                        entry.primary_key,
                    )
                })
                .collect();
            candidates.sort_unstable();

            let excess = self.entries.len() - policy.capacity;
            for (_, _, pk) in candidates.into_iter().take(excess) {
                self.entries.remove(&pk);
                evicted.push(pk);
            }
        }

        if !evicted.is_empty() {
            self.compact();
        }
        evicted
    }

    /// Shrink tables that have collected more stale mappings than live ones
    fn compact(&mut self) {
        let live = self.entries.len();
        for table in &mut self.tables {
            if table.len() > live.saturating_mul(2) {
                let dropped = table.retain_live(&self.entries);
                tracing::debug!(
                    "Compacted index '{}': dropped {} stale mappings",
                    table.name(),
                    dropped
                );
            }
        }
    }
}

fn slot_mismatch(slot: usize) -> CacheError {
    CacheError::InternalError(format!("index slot {slot} does not match its key type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy(capacity: usize, min_age: u64, max_age: u64) -> SweepPolicy {
        SweepPolicy {
            capacity,
            min_age: Duration::from_secs(min_age),
            max_age: Duration::from_secs(max_age),
        }
    }

    fn state_with(entries: &[(PrimaryKey, u64)]) -> CacheState<&'static str> {
        let mut state = CacheState::new();
        for (tick, (pk, at)) in entries.iter().enumerate() {
            state.insert(CacheEntry::new(
                *pk,
                Arc::new("value"),
                Duration::from_secs(*at),
                tick as u64,
            ));
        }
        state
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let mut state = state_with(&[(1, 0), (2, 0), (3, 0)]);

        let evicted = state.sweep(Duration::ZERO, policy(2, 0, u64::MAX / 2));

        assert_eq!(evicted, vec![1]);
        assert!(state.entries.contains_key(&2));
        assert!(state.entries.contains_key(&3));
    }

    #[test]
    fn test_min_age_blocks_capacity_eviction() {
        let mut state = state_with(&[(1, 0), (2, 1)]);

        assert!(state.sweep(Duration::from_secs(1), policy(1, 10, 3600)).is_empty());
        assert_eq!(state.entries.len(), 2);

        assert!(state.sweep(Duration::from_secs(9), policy(1, 10, 3600)).is_empty());

        let evicted = state.sweep(Duration::from_secs(10), policy(1, 10, 3600));
        assert_eq!(evicted, vec![1]);
        assert_eq!(state.entries.len(), 1);
    }

    #[test]
    fn test_max_age_applies_under_capacity() {
        let mut state = state_with(&[(1, 0), (2, 50)]);

        let evicted = state.sweep(Duration::from_secs(101), policy(10, 0, 100));

        assert_eq!(evicted, vec![1]);
        assert!(state.entries.contains_key(&2));
    }

    #[test]
    fn test_recent_access_protects_entry() {
        let mut state = state_with(&[(1, 0), (2, 1), (3, 2)]);
        state.entries[&1].touch(Duration::from_secs(3), 10);

        let evicted = state.sweep(Duration::from_secs(3), policy(2, 0, 3600));
        assert_eq!(evicted, vec![2]);
    }
}
