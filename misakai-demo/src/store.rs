use crate::actor::{Actor, ActorRow};
use chrono::{Duration as ChronoDuration, Utc};
use misakai_storage::{BackingStore, PrimaryKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Actor table kept in memory, standing in for a database
pub struct InMemoryStore {
    rows: RwLock<HashMap<PrimaryKey, ActorRow>>,
    latency: Duration,
}

impl InMemoryStore {
    pub fn new(latency: Duration) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            latency,
        }
    }

    /// Store pre-filled with `count` actors, ids starting at 1
    pub fn seeded(count: u64, latency: Duration) -> Self {
        let store = Self::new(latency);
        let now = Utc::now();
        {
            let mut rows = store.rows.write();
            for oid in 1..=count {
                rows.insert(
                    oid,
                    ActorRow {
                        oid,
                        tag: Some(format!("github:{}", 1000 + oid)),
                        name: format!("Actor {oid}"),
                        email: format!("actor{oid}@example.com"),
                        bio: String::new(),
                        created_at: now - ChronoDuration::days(oid as i64),
                    },
                );
            }
        }
        store
    }

    /// Write an actor back, replacing the stored row
    pub fn save(&self, actor: &Actor) {
        let row = actor.to_row();
        debug!("Saving actor {}", row.oid);
        self.rows.write().insert(row.oid, row);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }
}

impl BackingStore<Actor> for InMemoryStore {
    fn fetch_by_key(&self, key: PrimaryKey) -> anyhow::Result<Option<Actor>> {
        self.simulate_latency();
        Ok(self.rows.read().get(&key).cloned().map(Actor::from))
    }

    fn fetch_by_tag(&self, tag: &str) -> anyhow::Result<Option<Actor>> {
        self.simulate_latency();
        Ok(self
            .rows
            .read()
            .values()
            .find(|row| row.tag.as_deref() == Some(tag))
            .cloned()
            .map(Actor::from))
    }

    fn fetch_many_by_tag(&self, tag: &str) -> anyhow::Result<Vec<Actor>> {
        self.simulate_latency();
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| row.tag.as_deref() == Some(tag))
            .cloned()
            .map(Actor::from)
            .collect())
    }
}
