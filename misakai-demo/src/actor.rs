use chrono::{DateTime, Utc};
use misakai_storage::{
    BackingStore, CacheConfig, CacheError, CacheProvider, Entity, Expected, FaultSink, PrimaryKey,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stored form of an actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRow {
    pub oid: PrimaryKey,
    /// OAuth identity as `provider:id`
    pub tag: Option<String>,
    pub name: String,
    pub email: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

/// A person or an organization.
///
/// Cached actors are shared, so the editable profile fields sit behind a lock.
#[derive(Debug)]
pub struct Actor {
    oid: PrimaryKey,
    tag: Option<String>,
    pub name: String,
    pub email: String,
    bio: RwLock<String>,
    pub created_at: DateTime<Utc>,
}

impl Actor {
    pub fn bio(&self) -> String {
        self.bio.read().clone()
    }

    pub fn set_bio(&self, bio: &str) {
        *self.bio.write() = bio.to_string();
    }

    pub fn to_row(&self) -> ActorRow {
        ActorRow {
            oid: self.oid,
            tag: self.tag.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            bio: self.bio(),
            created_at: self.created_at,
        }
    }
}

impl From<ActorRow> for Actor {
    fn from(row: ActorRow) -> Self {
        Self {
            oid: row.oid,
            tag: row.tag,
            name: row.name,
            email: row.email,
            bio: RwLock::new(row.bio),
            created_at: row.created_at,
        }
    }
}

impl Entity for Actor {
    fn oid(&self) -> PrimaryKey {
        self.oid
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn set_tag(&mut self, tag: &str) {
        self.tag = Some(tag.to_string());
    }
}

/// Cached access to actors
#[derive(Clone)]
pub struct ActorProvider {
    inner: CacheProvider<Actor>,
}

impl ActorProvider {
    pub fn new(
        store: Arc<dyn BackingStore<Actor>>,
        config: CacheConfig,
        sink: FaultSink,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            inner: CacheProvider::new(store, config, sink)?,
        })
    }

    /// Get an actor by the identity an OAuth provider gave it
    pub fn from_oauth(&self, provider: &str, id: &str) -> Expected<Arc<Actor>> {
        self.inner.get_by_tag(&format!("{provider}:{id}"))
    }
}

impl std::ops::Deref for ActorProvider {
    type Target = CacheProvider<Actor>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(oid: PrimaryKey) -> ActorRow {
        ActorRow {
            oid,
            tag: Some(format!("github:{}", 1000 + oid)),
            name: format!("actor {oid}"),
            email: format!("actor{oid}@example.com"),
            bio: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_bio_edit_round_trips_to_row() {
        let actor = Actor::from(row(7));
        actor.set_bio("Hello");

        let saved = actor.to_row();
        assert_eq!(saved.bio, "Hello");
        assert_eq!(saved.tag.as_deref(), Some("github:1007"));
    }
}
