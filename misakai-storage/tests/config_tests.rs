// Configuration Loading Tests

use misakai_storage::{CacheConfig, CacheError, LruCache};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_yaml(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_yaml(
        r#"
capacity: 250
min_age_ms: 1000
max_age_ms: 60000
lock_timeout_ms: 500
sweep_interval_ms: 5000
"#,
    );

    let config = CacheConfig::from_file(file.path()).unwrap();

    assert_eq!(config.capacity, 250);
    assert_eq!(config.min_age(), Duration::from_secs(1));
    assert_eq!(config.max_age(), Duration::from_secs(60));
    assert_eq!(config.lock_timeout(), Duration::from_millis(500));
    assert_eq!(config.sweep_interval(), Some(Duration::from_secs(5)));
}

#[test]
fn test_missing_fields_use_defaults() {
    let file = write_yaml("capacity: 42\n");

    let config = CacheConfig::from_file(file.path()).unwrap();

    assert_eq!(
        config,
        CacheConfig {
            capacity: 42,
            ..Default::default()
        }
    );
}

#[test]
fn test_invalid_values_rejected() {
    let file = write_yaml("capacity: 10\nmin_age_ms: 5000\nmax_age_ms: 100\n");

    let err = CacheConfig::from_file(file.path()).unwrap_err();
    let cause = err.downcast_ref::<CacheError>();

    assert!(matches!(cause, Some(CacheError::InvalidConfig(_))));
}

#[test]
fn test_malformed_yaml_rejected() {
    let file = write_yaml("capacity: [not a number\n");
    assert!(CacheConfig::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(CacheConfig::from_file(dir.path().join("absent.yml")).is_err());
}

#[test]
fn test_loaded_config_builds_cache() {
    let file = write_yaml("capacity: 3\nmin_age_ms: 0\n");
    let config = CacheConfig::from_file(file.path()).unwrap();

    let cache = LruCache::new(config, |value: &u64| *value).unwrap();
    for value in 0..5u64 {
        cache.put(value).unwrap();
    }

    assert_eq!(cache.len(), 3);
}
