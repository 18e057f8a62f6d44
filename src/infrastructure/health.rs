//! Deployment health reporting for the `check` command.

use std::fmt;

use crate::infrastructure::config::Config;
use crate::port::outbound::KeyValueStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("ok"),
            Self::Unhealthy(reason) => write!(f, "FAIL: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    name: &'static str,
    critical: bool,
    status: HealthStatus,
}

impl HealthCheck {
    fn new(name: &'static str, critical: bool, problem: Option<String>) -> Self {
        Self {
            name,
            critical,
            status: problem.map_or(HealthStatus::Healthy, HealthStatus::Unhealthy),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn critical(&self) -> bool {
        self.critical
    }

    pub fn status(&self) -> &HealthStatus {
        &self.status
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    /// True when every critical check passed.
    pub fn is_healthy(&self) -> bool {
        self.checks
            .iter()
            .filter(|check| check.critical())
            .all(HealthCheck::is_healthy)
    }

    pub fn find(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|check| check.name == name)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let kind = if check.critical { "critical" } else { "optional" };
            writeln!(f, "{:<18} {:<9} {}", check.name, kind, check.status)?;
        }
        Ok(())
    }
}

/// Check `config` and, when given, the shared store it points at.
///
/// `store` is `None` when no store is configured or it could not be reached
/// at start-up.
pub async fn health_check(config: &Config, store: Option<&dyn KeyValueStore>) -> HealthReport {
    let checks = vec![
        HealthCheck::new("settings", true, config.validate().err().map(|err| err.to_string())),
        HealthCheck::new("feed_url", true, feed_url_problem(config)),
        HealthCheck::new("reconnection", true, reconnection_problem(config)),
        HealthCheck::new("health_thresholds", true, threshold_problem(config)),
        HealthCheck::new("shared_store", false, store_problem(config, store).await),
        HealthCheck::new("cache_ttl", false, cache_problem(config)),
    ];
    HealthReport { checks }
}

fn feed_url_problem(config: &Config) -> Option<String> {
    let url = config.feed.url.trim();
    if url.is_empty() {
        return Some("feed.url is empty".to_string());
    }
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => None,
        Ok(parsed) => Some(format!("unsupported scheme '{}', expected ws or wss", parsed.scheme())),
        Err(err) => Some(err.to_string()),
    }
}

fn reconnection_problem(config: &Config) -> Option<String> {
    let policy = &config.feed.reconnection;
    if policy.initial_delay_ms == 0 {
        Some("initial_delay_ms is 0".to_string())
    } else if policy.max_delay_ms < policy.initial_delay_ms {
        Some("max_delay_ms is below initial_delay_ms".to_string())
    } else if policy.backoff_multiplier.is_nan() || policy.backoff_multiplier < 1.0 {
        Some("backoff_multiplier is below 1.0".to_string())
    } else if policy.max_attempts == 0 {
        Some("max_attempts is 0".to_string())
    } else {
        None
    }
}

fn threshold_problem(config: &Config) -> Option<String> {
    let health = &config.feed.health;
    if !(0 < health.excellent_ms && health.excellent_ms < health.good_ms && health.good_ms < health.poor_ms) {
        return Some("thresholds must be ordered excellent < good < poor".to_string());
    }
    if health.check_interval_ms == 0 || health.check_interval_ms >= health.poor_ms {
        return Some(format!(
            "check_interval_ms ({}) must be between 0 and poor_ms ({})",
            health.check_interval_ms, health.poor_ms
        ));
    }
    None
}

async fn store_problem(config: &Config, store: Option<&dyn KeyValueStore>) -> Option<String> {
    match (config.store.url.as_deref(), store) {
        (None, _) => Some("not configured, running memory-only".to_string()),
        (Some(_), None) => Some("not connected, running memory-only".to_string()),
        (Some(_), Some(store)) => {
            let probe = format!("{}:health", config.store.key_prefix);
            store.get(&probe).await.err().map(|err| err.to_string())
        }
    }
}

fn cache_problem(config: &Config) -> Option<String> {
    let cache = &config.cache;
    (cache.memory_max_ttl_secs > cache.default_ttl_secs).then(|| {
        format!(
            "memory_max_ttl_secs ({}) exceeds default_ttl_secs ({})",
            cache.memory_max_ttl_secs, cache.default_ttl_secs
        )
    })
}
