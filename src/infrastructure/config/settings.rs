//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all settings.
//! Configuration is loaded from a TOML file; the feed and store URLs can be
//! overridden from the environment so deployments never need them on disk.
//!
//! # Example
//!
//! ```no_run
//! use tidewatch::infrastructure::config::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use super::feed::FeedConfig;
use super::logging::LoggingConfig;
use super::store::{CacheConfig, StoreConfig};
use crate::error::{ConfigError, Result};

/// Environment variable overriding `feed.url`.
pub const FEED_URL_ENV: &str = "TIDEWATCH_FEED_URL";
/// Environment variable overriding `store.url`.
pub const REDIS_URL_ENV: &str = "TIDEWATCH_REDIS_URL";

/// Main application configuration.
///
/// Every section is optional; an empty file yields a memory-only setup
/// pointed at the default feed URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream feed connection, reconnection and health settings.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Shared key-value store. Without a URL the limiter and cache run on
    /// local memory only.
    #[serde(default)]
    pub store: StoreConfig,

    /// Cache service settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Parse configuration from TOML content, apply environment overrides
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config = Self::parse_unvalidated(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_unvalidated(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML content is
    /// malformed, or validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and apply environment overrides without validating,
    /// so out-of-range values can be reported instead of rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_unvalidated(&content)
    }

    /// Apply URL overrides from `lookup` (normally the process environment).
    ///
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(FEED_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.feed.url = url;
        }
        if let Some(url) = lookup(REDIS_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.store.url = Some(url);
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] or [`ConfigError::InvalidValue`]
    /// for the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.feed.url.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "feed.url" }.into());
        }
        url::Url::parse(&self.feed.url).map_err(|e| ConfigError::InvalidValue {
            field: "feed.url",
            reason: e.to_string(),
        })?;
        if self.feed.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "handshake_timeout_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        let reconnection = &self.feed.reconnection;
        if reconnection.initial_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "initial_delay_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if reconnection.max_delay_ms < reconnection.initial_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "max_delay_ms",
                reason: "must be >= initial_delay_ms".to_string(),
            }
            .into());
        }
        if reconnection.backoff_multiplier.is_nan() || reconnection.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "backoff_multiplier",
                reason: "must be >= 1.0".to_string(),
            }
            .into());
        }
        if reconnection.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        let health = &self.feed.health;
        if health.check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "check_interval_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if !(0 < health.excellent_ms
            && health.excellent_ms < health.good_ms
            && health.good_ms < health.poor_ms)
        {
            return Err(ConfigError::InvalidValue {
                field: "health_thresholds",
                reason: "must be ordered 0 < excellent_ms < good_ms < poor_ms".to_string(),
            }
            .into());
        }

        if self.store.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store.timeout_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.store.key_prefix.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "store.key_prefix",
            }
            .into());
        }
        if let Some(url) = &self.store.url {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                field: "store.url",
                reason: e.to_string(),
            })?;
        }

        if self.cache.memory_max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory_max_entries",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval_secs",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}
