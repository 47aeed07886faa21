pub mod clock;
pub mod error;
pub mod lock;
pub mod sink;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, Expected, ExpectedExt, Result};
pub use lock::{LockScope, LockStatus, UpgradableLock};
pub use sink::FaultSink;
pub use types::{CacheStats, EntryView, PrimaryKey};
