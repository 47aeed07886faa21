use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::{CacheError, Result};

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Soft entry limit; exceeded while surplus entries are younger than `min_age`
    pub capacity: usize,
    /// Time after an access during which an entry is never evicted
    pub min_age_ms: u64,
    /// Idle time after which an entry is evicted regardless of capacity
    pub max_age_ms: u64,
    /// Bound on every lock acquisition
    pub lock_timeout_ms: u64,
    /// Period of the background sweep, if any. Sweeps always run on insert.
    pub sweep_interval_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            min_age_ms: 20_000,
            max_age_ms: 30 * 60 * 1000,
            lock_timeout_ms: 30_000,
            sweep_interval_ms: None,
        }
    }
}

impl CacheConfig {
    /// Default timings with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CacheConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age_ms = millis(min_age);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_ms = millis(max_age);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = millis(timeout);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = Some(millis(interval));
        self
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_millis(self.min_age_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }

    /// Reject settings the eviction policy cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "capacity must be positive".to_string(),
            ));
        }
        if self.max_age_ms < self.min_age_ms {
            return Err(CacheError::InvalidConfig(format!(
                "max_age_ms ({}) must not be below min_age_ms ({})",
                self.max_age_ms, self.min_age_ms
            )));
        }
        if self.sweep_interval_ms == Some(0) {
            return Err(CacheError::InvalidConfig(
                "sweep_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.min_age(), Duration::from_secs(20));
        assert_eq!(config.max_age(), Duration::from_secs(30 * 60));
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new(2)
            .with_min_age(Duration::ZERO)
            .with_max_age(Duration::MAX)
            .with_lock_timeout(Duration::from_millis(250))
            .with_sweep_interval(Duration::from_secs(1));

        assert_eq!(config.capacity, 2);
        assert_eq!(config.min_age_ms, 0);
        assert_eq!(config.max_age_ms, u64::MAX);
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.sweep_interval_ms, Some(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            CacheConfig::new(0).validate(),
            Err(CacheError::InvalidConfig(_))
        ));

        let inverted = CacheConfig::new(10)
            .with_min_age(Duration::from_secs(60))
            .with_max_age(Duration::from_secs(30));
        assert!(matches!(
            inverted.validate(),
            Err(CacheError::InvalidConfig(_))
        ));

        let mut no_interval = CacheConfig::new(10);
        no_interval.sweep_interval_ms = Some(0);
        assert!(no_interval.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: CacheConfig = serde_yaml::from_str("capacity: 5\nmin_age_ms: 0\n").unwrap();
        assert_eq!(config.capacity, 5);
        assert_eq!(config.min_age_ms, 0);
        assert_eq!(config.max_age_ms, 30 * 60 * 1000);
    }
}
