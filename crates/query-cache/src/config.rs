//! Cache configuration options

use query_core::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the query cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub max_entries: usize,
    /// Base time-to-live before adaptive scaling
    #[serde(with = "duration_ms", rename = "default_ttl_ms")]
    pub default_ttl: Duration,
    /// Interval of the background expiry sweep
    #[serde(with = "duration_ms", rename = "sweep_interval_ms")]
    pub sweep_interval: Duration,
    /// Occupancy ratio above which the sweep also evicts one entry
    pub sweep_eviction_ratio: f64,
    /// Whether snapshots are written to the attached store
    pub persistence_enabled: bool,
    /// Maximum number of entries written per snapshot
    pub persist_limit: usize,
    /// Store key holding the snapshot
    pub storage_key: String,
    /// Whether caching is enabled
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            default_ttl: Duration::from_secs(300), // 5 minutes
            sweep_interval: Duration::from_secs(60),
            sweep_eviction_ratio: 0.8,
            persistence_enabled: true,
            persist_limit: 100,
            storage_key: "query_cache".to_string(),
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with custom settings
    pub fn new(max_entries: usize, ttl_secs: u64) -> Self {
        Self {
            max_entries,
            default_ttl: Duration::from_secs(ttl_secs),
            ..Default::default()
        }
    }

    /// Create a disabled cache configuration
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| QueryError::ConfigError(format!("{}: {}", path.display(), e)))?;
        let config: CacheConfig = serde_json::from_str(&contents)
            .map_err(|e| QueryError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(QueryError::ConfigError(
                "max_entries must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(QueryError::ConfigError(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sweep_eviction_ratio) {
            return Err(QueryError::ConfigError(format!(
                "sweep_eviction_ratio must be within 0..=1, got {}",
                self.sweep_eviction_ratio
            )));
        }
        Ok(())
    }

    /// Set the maximum number of entries
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the base TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable or disable snapshot persistence
    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.persistence_enabled = enabled;
        self
    }

    /// Set the snapshot store key
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Enable or disable the cache
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 500);
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.persist_limit, 100);
        assert!(config.persistence_enabled);
        assert!(config.enabled);
    }

    #[test]
    fn test_disabled_config() {
        let config = CacheConfig::disabled();
        assert!(!config.enabled);
    }

    #[test]
    fn test_builder_pattern() {
        let config = CacheConfig::default()
            .with_max_entries(50)
            .with_ttl(Duration::from_secs(60))
            .with_persistence(false)
            .with_storage_key("courses_cache");

        assert_eq!(config.max_entries, 50);
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert!(!config.persistence_enabled);
        assert_eq!(config.storage_key, "courses_cache");
    }

    #[test]
    fn test_json_uses_milliseconds() {
        let config = CacheConfig::default().with_ttl(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["default_ttl_ms"], 1500);

        let parsed: CacheConfig =
            serde_json::from_str(r#"{"max_entries": 10, "default_ttl_ms": 2000}"#).unwrap();
        assert_eq!(parsed.max_entries, 10);
        assert_eq!(parsed.default_ttl, Duration::from_secs(2));
        assert_eq!(parsed.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_entries": 42, "persistence_enabled": false}}"#).unwrap();

        let config = CacheConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_entries, 42);
        assert!(!config.persistence_enabled);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_entries": 0}}"#).unwrap();

        let err = CacheConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, QueryError::ConfigError(_)));
    }
}
