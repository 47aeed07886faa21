pub mod cache;
pub mod config;
pub mod core;
pub mod provider;

// Re-export commonly used types
pub use cache::{Index, LruCache};
pub use config::CacheConfig;
pub use crate::core::{
    CacheError, CacheStats, Clock, EntryView, Expected, ExpectedExt, FaultSink, LockScope,
    LockStatus, ManualClock, PrimaryKey, SystemClock, UpgradableLock,
};
pub use provider::{BackingStore, CacheProvider, Entity, Resolved};
