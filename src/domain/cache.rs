//! Cache request options and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which tier(s) a cache call reads from and writes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLayer {
    /// In-process tier only.
    Memory,
    /// Shared store only.
    Shared,
    #[default]
    Both,
}

impl CacheLayer {
    #[must_use]
    pub const fn uses_memory(&self) -> bool {
        matches!(self, Self::Memory | Self::Both)
    }

    #[must_use]
    pub const fn uses_shared(&self) -> bool {
        matches!(self, Self::Shared | Self::Both)
    }
}

/// Per-call options for `CacheService::get` and `CacheService::set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub layer: CacheLayer,
}

impl CacheOptions {
    #[must_use]
    pub const fn new(ttl: Duration, layer: CacheLayer) -> Self {
        Self { ttl, layer }
    }

    #[must_use]
    pub const fn ttl_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs), CacheLayer::Both)
    }

    #[must_use]
    pub const fn with_layer(mut self, layer: CacheLayer) -> Self {
        self.layer = layer;
        self
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::ttl_secs(60)
    }
}

/// Counters reported by `CacheService::get_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub memory_entries: usize,
    pub shared_enabled: bool,
}

impl CacheStats {
    /// Fraction of lookups served from either tier.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.shared_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
