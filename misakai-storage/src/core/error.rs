use std::time::Duration;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Backing store fault in index '{index}': {detail}")]
    BackingStore { index: String, detail: String },

    #[error("Lock acquisition timed out after {0:?}")]
    LockTimeout(Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CacheError {
    /// Wrap a fault raised by a backing-store loader
    pub fn backing_store(index: &str, err: &anyhow::Error) -> Self {
        Self::BackingStore {
            index: index.to_string(),
            detail: format!("{err:#}"),
        }
    }

    /// Whether this error came from outside the cache (loader fault or lock contention)
    /// rather than from a caller asking for something absent.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::BackingStore { .. } | Self::LockTimeout(_))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Outcome of a lookup: `Ok(Some)` found, `Ok(None)` absent, `Err` on fault
pub type Expected<T> = Result<Option<T>>;

/// Conversions for callers that need a value rather than a tri-state
pub trait ExpectedExt<T> {
    /// Turn an absent value into `CacheError::NotFound`
    fn require(self, what: impl std::fmt::Display) -> Result<T>;
}

impl<T> ExpectedExt<T> for Expected<T> {
    fn require(self, what: impl std::fmt::Display) -> Result<T> {
        self?.ok_or_else(|| CacheError::NotFound(what.to_string()))
    }
}
