//! Upstream feed connection configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::ConnectionQuality;

/// Reconnection backoff policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectionConfig {
    /// Delay before the first reconnection attempt (milliseconds).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Attempts before giving up and emitting the terminal event.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    1000 // 1 second
}

fn default_max_delay_ms() -> u64 {
    30000 // 30 seconds
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Staleness thresholds for the periodic health check.
///
/// Silence shorter than `excellent_ms` is excellent, shorter than `good_ms`
/// is good, shorter than `poor_ms` is poor; anything longer counts as
/// disconnected and forces a reconnect.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_excellent_ms")]
    pub excellent_ms: u64,
    #[serde(default = "default_good_ms")]
    pub good_ms: u64,
    #[serde(default = "default_poor_ms")]
    pub poor_ms: u64,
}

const fn default_check_interval_ms() -> u64 {
    5_000
}

const fn default_excellent_ms() -> u64 {
    5_000
}

const fn default_good_ms() -> u64 {
    15_000
}

const fn default_poor_ms() -> u64 {
    30_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            excellent_ms: default_excellent_ms(),
            good_ms: default_good_ms(),
            poor_ms: default_poor_ms(),
        }
    }
}

impl HealthConfig {
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Classify a silence of `age` against the thresholds.
    #[must_use]
    pub fn classify(&self, age: Duration) -> ConnectionQuality {
        let age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
        if age_ms < self.excellent_ms {
            ConnectionQuality::Excellent
        } else if age_ms < self.good_ms {
            ConnectionQuality::Good
        } else if age_ms < self.poor_ms {
            ConnectionQuality::Poor
        } else {
            ConnectionQuality::Disconnected
        }
    }
}

/// Feed connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// WebSocket URL of the upstream feed.
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// Time allowed for the transport handshake (milliseconds).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default)]
    pub reconnection: ReconnectionConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

fn default_feed_url() -> String {
    "wss://stream.example.com/ws".to_string()
}

const fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reconnection: ReconnectionConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl FeedConfig {
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
