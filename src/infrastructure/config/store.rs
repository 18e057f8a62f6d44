//! Shared store and cache configuration.

use std::time::Duration;

use serde::Deserialize;

/// Shared key-value store connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Redis URL. When absent every component runs on local memory only.
    #[serde(default)]
    pub url: Option<String>,
    /// Per-call timeout (milliseconds).
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    /// Prefix applied to every key this process writes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

const fn default_store_timeout_ms() -> u64 {
    500
}

fn default_key_prefix() -> String {
    "tidewatch".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_store_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Cache service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL used when a caller does not pass one (seconds).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Cap applied to every memory-tier TTL (seconds).
    #[serde(default = "default_memory_max_ttl_secs")]
    pub memory_max_ttl_secs: u64,
    /// Maximum number of memory-tier entries.
    #[serde(default = "default_memory_max_entries")]
    pub memory_max_entries: usize,
    /// How often expired memory entries are swept (seconds).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

const fn default_ttl_secs() -> u64 {
    300
}

const fn default_memory_max_ttl_secs() -> u64 {
    60
}

const fn default_memory_max_entries() -> usize {
    10_000
}

const fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            memory_max_ttl_secs: default_memory_max_ttl_secs(),
            memory_max_entries: default_memory_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    #[must_use]
    pub fn memory_max_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_max_ttl_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
