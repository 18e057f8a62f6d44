//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.

use crate::infrastructure::config::{
    CacheConfig, FeedConfig, HealthConfig, ReconnectionConfig, StoreConfig,
};

/// 1s doubling to 30s, three attempts. Matches the timings tests assert on.
pub fn reconnection() -> ReconnectionConfig {
    ReconnectionConfig {
        initial_delay_ms: 1_000,
        max_delay_ms: 30_000,
        backoff_multiplier: 2.0,
        max_attempts: 3,
    }
}

/// Default thresholds (5s/15s/30s) checked every second.
pub fn health() -> HealthConfig {
    HealthConfig {
        check_interval_ms: 1_000,
        ..HealthConfig::default()
    }
}

/// Feed config for mock transports.
pub fn feed() -> FeedConfig {
    FeedConfig {
        url: "ws://mock.feed/ws".to_string(),
        handshake_timeout_ms: 2_000,
        reconnection: reconnection(),
        health: health(),
    }
}

/// Store settings with a short prefix so keys are easy to assert on.
pub fn store() -> StoreConfig {
    StoreConfig {
        url: None,
        timeout_ms: 100,
        key_prefix: "tw".to_string(),
    }
}

/// Small memory tier so eviction is easy to trigger.
pub fn cache() -> CacheConfig {
    CacheConfig {
        default_ttl_secs: 300,
        memory_max_ttl_secs: 60,
        memory_max_entries: 100,
        sweep_interval_secs: 30,
    }
}
