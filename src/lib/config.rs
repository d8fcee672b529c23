use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::U256;
use serde::Deserialize;

use crate::adapters::retrying::RetryPolicy;
use crate::domain::leaf::parse_amount;

/// Service configuration loaded from TOML. Every key has a default, so an
/// empty file is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// Per-account amount for trees created through `POST /accounts`,
    /// as a decimal string in base units.
    pub default_amount: String,
    /// Trees kept in the rebuilt-tree cache. 0 disables caching.
    pub cache_capacity: usize,
    /// Upper bound on concurrent lookups in batch resolution.
    pub max_concurrent_lookups: usize,
    /// Content file published at startup, if any.
    pub seed_content: Option<PathBuf>,
    pub datastore: DatastoreConfig,
}

/// `[datastore]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatastoreConfig {
    /// Bound on each store-level datastore operation, e.g. "5s". Covers
    /// every retry attempt and backoff sleep of that operation.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 17172)),
            default_amount: "1000000000000000000".into(),
            cache_capacity: 64,
            max_concurrent_lookups: 16,
            seed_content: None,
            datastore: DatastoreConfig::default(),
        }
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            request_timeout: Duration::from_secs(5),
            retry_attempts: retry.attempts,
            initial_backoff: retry.initial_backoff,
            max_backoff: retry.max_backoff,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl ServiceConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_amount()?;

        if self.max_concurrent_lookups == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_lookups must be at least 1".into(),
            ));
        }
        if self.datastore.retry_attempts == 0 {
            return Err(ConfigError::Validation(
                "datastore.retry_attempts must be at least 1".into(),
            ));
        }
        if self.datastore.initial_backoff > self.datastore.max_backoff {
            return Err(ConfigError::Validation(
                "datastore.initial_backoff must not exceed datastore.max_backoff".into(),
            ));
        }
        Ok(())
    }

    pub fn default_amount(&self) -> Result<U256, ConfigError> {
        parse_amount(&self.default_amount)
            .map_err(|e| ConfigError::Validation(format!("default_amount: {e}")))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.datastore.retry_attempts,
            initial_backoff: self.datastore.initial_backoff,
            max_backoff: self.datastore.max_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ServiceConfig::from_toml("").unwrap();
        assert_eq!(config.listen_addr.port(), 17172);
        assert_eq!(config.max_concurrent_lookups, 16);
        assert_eq!(config.datastore.request_timeout, Duration::from_secs(5));
        assert_eq!(
            config.default_amount().unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
    }

    #[test]
    fn parses_full_config() {
        let config = ServiceConfig::from_toml(
            r#"
            listen_addr = "0.0.0.0:8080"
            default_amount = "250"
            cache_capacity = 0
            max_concurrent_lookups = 4
            seed_content = "data.json"

            [datastore]
            request_timeout = "750ms"
            retry_attempts = 5
            initial_backoff = "50ms"
            max_backoff = "1s"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.default_amount().unwrap(), U256::from(250));
        assert_eq!(config.seed_content, Some(PathBuf::from("data.json")));
        assert_eq!(config.datastore.request_timeout, Duration::from_millis(750));
        assert_eq!(config.retry_policy().attempts, 5);
    }

    #[test]
    fn rejects_bad_values() {
        for toml in [
            "max_concurrent_lookups = 0",
            "default_amount = \"-5\"",
            "[datastore]\nretry_attempts = 0",
            "[datastore]\ninitial_backoff = \"10s\"\nmax_backoff = \"1s\"",
        ] {
            assert!(
                matches!(
                    ServiceConfig::from_toml(toml),
                    Err(ConfigError::Validation(_))
                ),
                "{toml:?} should fail validation"
            );
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            ServiceConfig::from_toml("listen_port = 80"),
            Err(ConfigError::Parse(_))
        ));
    }
}
