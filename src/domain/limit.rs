//! Rate-limit tiers and decisions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Named quota profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Api,
    Unlimited,
}

/// Immutable request budget for a tier: `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierProfile {
    pub limit: u64,
    pub window: Duration,
}

impl Tier {
    pub const ALL: [Self; 4] = [Self::Free, Self::Pro, Self::Api, Self::Unlimited];

    #[must_use]
    pub const fn profile(&self) -> TierProfile {
        match self {
            Self::Free => TierProfile {
                limit: 60,
                window: Duration::from_secs(60),
            },
            Self::Pro => TierProfile {
                limit: 300,
                window: Duration::from_secs(60),
            },
            Self::Api => TierProfile {
                limit: 1_000,
                window: Duration::from_secs(60),
            },
            Self::Unlimited => TierProfile {
                limit: u64::MAX,
                window: Duration::from_secs(60),
            },
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Api => "api",
            Self::Unlimited => "unlimited",
        }
    }

    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier names come from code and config, never from request input, so an
/// unknown name is surfaced as an error rather than mapped to a default.
impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| Error::UnknownTier(s.to_string()))
    }
}

/// Where a limiter decision was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Shared store counter; consistent across processes.
    Shared,
    /// In-process fallback counter.
    Local,
    /// Internal error; request allowed without counting.
    FailOpen,
    /// Tier has no quota.
    Bypass,
}

/// Outcome of one `check_limit` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the current window ends.
    pub reset_at_ms: u64,
    pub source: DecisionSource,
}

impl RateLimitDecision {
    /// Build a decision from the post-increment window count.
    #[must_use]
    pub fn from_count(count: u64, limit: u64, reset_at_ms: u64, source: DecisionSource) -> Self {
        Self {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at_ms,
            source,
        }
    }

    /// Window end as a UTC timestamp.
    #[must_use]
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.reset_at_ms as i64).single()
    }

    /// Advisory metadata for a rejection (or success) response.
    #[must_use]
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", (self.reset_at_ms / 1000).to_string()),
        ]
    }
}

/// Read-only view of a window, returned by `get_usage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    /// `None` when no window is open for the identifier.
    pub reset_at_ms: Option<u64>,
}
