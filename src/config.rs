//! Engine Configuration
//!
//! Tunables for the result cache, execution timeouts and pagination. Values start
//! from [`EngineConfig::default`], can be overridden from `TRANSFORM_*` environment
//! variables and finally by command-line flags in the binary.

use crate::error::{Result, TransformError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory for relative datasource locations
    pub data_dir: PathBuf,

    /// Idle time after which a finished cache entry is evicted
    pub cache_ttl_secs: u64,

    /// Maximum number of cached results before LRU eviction kicks in
    pub cache_max_entries: usize,

    /// Upper bound for a single execution, including parent resolution and policies
    pub execution_timeout_secs: u64,

    /// Page size used when a request carries no `pageSpec.limit`
    pub default_page_size: usize,

    /// Maximum length of a parent chain
    pub max_parent_depth: usize,

    /// Interval of the background sweeper that drops expired entries
    pub sweep_interval_secs: u64,

    /// Number of offending row indices kept per validation rule
    pub validation_sample_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache_ttl_secs: 3600,
            cache_max_entries: 256,
            execution_timeout_secs: 300,
            default_page_size: 100,
            max_parent_depth: 16,
            sweep_interval_secs: 60,
            validation_sample_size: 10,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from defaults overridden by `TRANSFORM_*` variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("TRANSFORM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        override_from_env("TRANSFORM_CACHE_TTL_SECS", &mut config.cache_ttl_secs)?;
        override_from_env("TRANSFORM_CACHE_MAX_ENTRIES", &mut config.cache_max_entries)?;
        override_from_env("TRANSFORM_EXECUTION_TIMEOUT_SECS", &mut config.execution_timeout_secs)?;
        override_from_env("TRANSFORM_DEFAULT_PAGE_SIZE", &mut config.default_page_size)?;
        override_from_env("TRANSFORM_MAX_PARENT_DEPTH", &mut config.max_parent_depth)?;
        override_from_env("TRANSFORM_SWEEP_INTERVAL_SECS", &mut config.sweep_interval_secs)?;
        override_from_env("TRANSFORM_VALIDATION_SAMPLE_SIZE", &mut config.validation_sample_size)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_max_entries == 0 {
            return Err(TransformError::Config("cache_max_entries must be positive".to_string()));
        }
        if self.default_page_size == 0 {
            return Err(TransformError::Config("default_page_size must be positive".to_string()));
        }
        if self.execution_timeout_secs == 0 {
            return Err(TransformError::Config("execution_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T) -> Result<()> {
    if let Ok(raw) = std::env::var(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| TransformError::Config(format!("{} has an invalid value: {}", key, raw)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.default_page_size, 100);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EngineConfig {
            cache_max_entries: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(TransformError::Config(_))));
    }

    #[test]
    fn test_partial_json_config_falls_back_to_defaults() {
        let parsed: EngineConfig = serde_json::from_str(r#"{"cache_ttl_secs": 5}"#).unwrap();
        assert_eq!(parsed.cache_ttl_secs, 5);
        assert_eq!(parsed.cache_max_entries, 256);
    }
}
