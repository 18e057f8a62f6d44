//! Fixed-window rate limiter.
//!
//! Counts requests per (identifier, tier) in the shared store with one
//! atomic increment-with-expiry per check. When the store cannot answer,
//! counting moves to an in-process window map; if that map is full the
//! request is allowed without counting.
//!
//! The window is fixed, not sliding: a client can spend its quota at the end
//! of one window and again at the start of the next.

mod local;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

pub use local::{LocalWindow, LocalWindows};

use crate::domain::{DecisionSource, RateLimitDecision, RateLimitUsage, Tier};
use crate::error::StoreError;
use crate::port::outbound::{Clock, KeyValueStore};

/// Default bound on identifiers tracked by the local fallback.
pub const DEFAULT_LOCAL_CAPACITY: usize = 100_000;

/// Per-identifier, per-tier request limiter.
pub struct RateLimiter {
    store: Option<Arc<dyn KeyValueStore>>,
    local: LocalWindows,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

impl RateLimiter {
    /// A limiter backed by `store`, or local-only when `None`.
    pub fn new(
        store: Option<Arc<dyn KeyValueStore>>,
        clock: Arc<dyn Clock>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            local: LocalWindows::new(DEFAULT_LOCAL_CAPACITY),
            clock,
            key_prefix: key_prefix.into(),
        }
    }

    #[must_use]
    pub fn with_local_capacity(mut self, capacity: usize) -> Self {
        self.local = LocalWindows::new(capacity);
        self
    }

    fn key(&self, identifier: &str, tier: Tier) -> String {
        format!("{}:ratelimit:{}:{}", self.key_prefix, tier, identifier)
    }

    /// Count one request for `identifier` and decide whether it may proceed.
    ///
    /// Never fails: store errors degrade to the local counter and are logged.
    pub async fn check_limit(&self, identifier: &str, tier: Tier) -> RateLimitDecision {
        let profile = tier.profile();
        let now = self.clock.now_millis();

        if tier.is_unlimited() {
            return RateLimitDecision {
                allowed: true,
                limit: profile.limit,
                remaining: profile.limit,
                reset_at_ms: now + millis(profile.window),
                source: DecisionSource::Bypass,
            };
        }

        if let Some(store) = &self.store {
            let key = self.key(identifier, tier);
            match store.incr_with_expiry(&key, profile.window).await {
                Ok(counter) => {
                    let decision = RateLimitDecision::from_count(
                        counter.count,
                        profile.limit,
                        counter.reset_at_ms,
                        DecisionSource::Shared,
                    );
                    if !decision.allowed {
                        debug!(identifier, tier = %tier, count = counter.count, "Rate limit exceeded");
                    }
                    return decision;
                }
                Err(err) => {
                    warn!(
                        store = store.name(),
                        identifier,
                        tier = %tier,
                        error = %err,
                        "Rate limit store failed, counting locally"
                    );
                }
            }
        }

        match self.local.hit(identifier, tier, profile.window, now) {
            Some(window) => RateLimitDecision::from_count(
                window.count,
                profile.limit,
                window.reset_at_ms,
                DecisionSource::Local,
            ),
            None => {
                warn!(identifier, tier = %tier, "Local rate limit table full, allowing request");
                RateLimitDecision {
                    allowed: true,
                    limit: profile.limit,
                    remaining: profile.limit,
                    reset_at_ms: now + millis(profile.window),
                    source: DecisionSource::FailOpen,
                }
            }
        }
    }

    /// Read the current window without counting.
    pub async fn get_usage(&self, identifier: &str, tier: Tier) -> RateLimitUsage {
        let profile = tier.profile();
        let now = self.clock.now_millis();

        if !tier.is_unlimited() {
            if let Some(store) = &self.store {
                match self.shared_usage(store.as_ref(), identifier, tier).await {
                    Ok(Some((count, ttl))) => {
                        return usage(count, profile.limit, Some(now + millis(ttl)));
                    }
                    Ok(None) => return usage(0, profile.limit, None),
                    Err(err) => {
                        warn!(store = store.name(), identifier, error = %err, "Usage lookup failed, reading local counter");
                    }
                }
            }
        }

        match self.local.peek(identifier, tier, now) {
            Some(window) => usage(window.count, profile.limit, Some(window.reset_at_ms)),
            None => usage(0, profile.limit, None),
        }
    }

    async fn shared_usage(
        &self,
        store: &dyn KeyValueStore,
        identifier: &str,
        tier: Tier,
    ) -> Result<Option<(u64, Duration)>, StoreError> {
        let key = self.key(identifier, tier);
        let Some(raw) = store.get(&key).await? else {
            return Ok(None);
        };
        let count = raw.parse::<u64>().unwrap_or_default();
        let ttl = store.ttl(&key).await?.unwrap_or_default();
        Ok(Some((count, ttl)))
    }

    /// Clear counters for `identifier` in both stores; every tier when
    /// `tier` is `None`.
    pub async fn reset(&self, identifier: &str, tier: Option<Tier>) {
        let tiers: Vec<Tier> = match tier {
            Some(tier) => vec![tier],
            None => Tier::ALL.to_vec(),
        };
        let cleared = self.local.clear(identifier, &tiers);

        if let Some(store) = &self.store {
            let keys: Vec<String> = tiers.iter().map(|t| self.key(identifier, *t)).collect();
            match store.delete(&keys).await {
                Ok(removed) => debug!(identifier, local = cleared, shared = removed, "Rate limit reset"),
                Err(err) => warn!(store = store.name(), identifier, error = %err, "Rate limit reset failed in store"),
            }
        }
    }

    #[must_use]
    pub fn has_shared_store(&self) -> bool {
        self.store.is_some()
    }
}

fn usage(count: u64, limit: u64, reset_at_ms: Option<u64>) -> RateLimitUsage {
    RateLimitUsage {
        count,
        limit,
        remaining: limit.saturating_sub(count),
        reset_at_ms,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::clock::ManualClock;
    use crate::testkit::store::MemoryStore;

    fn limiter() -> (RateLimiter, MemoryStore, ManualClock) {
        let clock = ManualClock::default();
        let store = MemoryStore::new(Arc::new(clock.clone()));
        let limiter = RateLimiter::new(
            Some(Arc::new(store.clone())),
            Arc::new(clock.clone()),
            "tw",
        );
        (limiter, store, clock)
    }

    #[tokio::test]
    async fn free_tier_allows_sixty_then_denies() {
        let (limiter, _, clock) = limiter();
        let mut remaining = Vec::new();
        let mut first_reset = None;
        for _ in 0..60 {
            let decision = limiter.check_limit("ip1", Tier::Free).await;
            assert!(decision.allowed);
            assert_eq!(decision.source, DecisionSource::Shared);
            first_reset.get_or_insert(decision.reset_at_ms);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining.first(), Some(&59));
        assert_eq!(remaining.last(), Some(&0));
        assert!(remaining.windows(2).all(|w| w[0] > w[1]));

        let denied = limiter.check_limit("ip1", Tier::Free).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(Some(denied.reset_at_ms), first_reset);
        assert_eq!(first_reset, Some(clock.now_millis() + 60_000));
    }

    #[tokio::test]
    async fn reset_time_comes_from_the_store_window() {
        // The store's clock drifts 1ms per call against the limiter's.
        let store_clock = ManualClock::at(1_000_000);
        let local_clock = ManualClock::at(1_000_000);
        let store = MemoryStore::new(Arc::new(store_clock.clone()));
        let limiter = RateLimiter::new(Some(Arc::new(store)), Arc::new(local_clock.clone()), "tw");

        let first = limiter.check_limit("ip1", Tier::Free).await;
        for _ in 0..60 {
            store_clock.advance(Duration::from_millis(500));
            local_clock.advance(Duration::from_millis(501));
            let decision = limiter.check_limit("ip1", Tier::Free).await;
            assert_eq!(decision.reset_at_ms, first.reset_at_ms);
        }
        assert_eq!(first.reset_at_ms, 1_060_000);
    }

    #[tokio::test]
    async fn new_window_after_reset_time() {
        let (limiter, _, clock) = limiter();
        for _ in 0..61 {
            limiter.check_limit("ip1", Tier::Free).await;
        }
        clock.advance(Duration::from_secs(60));

        let decision = limiter.check_limit("ip1", Tier::Free).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 59);
    }

    #[tokio::test]
    async fn keys_are_namespaced_per_tier_and_identifier() {
        let (limiter, store, _) = limiter();
        limiter.check_limit("user:42", Tier::Pro).await;
        assert_eq!(store.live_keys(), vec!["tw:ratelimit:pro:user:42".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_store_falls_back_to_local_counter() {
        let (limiter, store, _) = limiter();
        store.fail_with(StoreError::Timeout(Duration::from_millis(100)));

        let first = limiter.check_limit("ip1", Tier::Free).await;
        assert!(first.allowed);
        assert_eq!(first.source, DecisionSource::Local);
        assert_eq!(first.remaining, 59);
        for _ in 0..59 {
            limiter.check_limit("ip1", Tier::Free).await;
        }
        let denied = limiter.check_limit("ip1", Tier::Free).await;
        assert!(!denied.allowed);
        assert_eq!(denied.source, DecisionSource::Local);
    }

    #[tokio::test]
    async fn protocol_errors_also_fall_back() {
        let (limiter, store, _) = limiter();
        store.fail_with(StoreError::Protocol("WRONGTYPE".into()));
        let decision = limiter.check_limit("ip1", Tier::Api).await;
        assert_eq!(decision.source, DecisionSource::Local);
        assert_eq!(decision.limit, 1_000);
    }

    #[tokio::test]
    async fn full_local_table_fails_open() {
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(None, Arc::new(clock), "tw").with_local_capacity(1);
        limiter.check_limit("a", Tier::Free).await;

        let decision = limiter.check_limit("b", Tier::Free).await;
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::FailOpen);
    }

    #[tokio::test]
    async fn unlimited_tier_never_touches_store() {
        let (limiter, store, _) = limiter();
        for _ in 0..5 {
            let decision = limiter.check_limit("svc", Tier::Unlimited).await;
            assert!(decision.allowed);
            assert_eq!(decision.source, DecisionSource::Bypass);
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn usage_is_read_only() {
        let (limiter, _, clock) = limiter();
        for _ in 0..3 {
            limiter.check_limit("ip1", Tier::Free).await;
        }
        clock.advance(Duration::from_secs(10));

        let usage = limiter.get_usage("ip1", Tier::Free).await;
        let again = limiter.get_usage("ip1", Tier::Free).await;
        assert_eq!(usage, again);
        assert_eq!(usage.count, 3);
        assert_eq!(usage.remaining, 57);
        assert_eq!(usage.reset_at_ms, Some(clock.now_millis() + 50_000));

        let idle = limiter.get_usage("ip2", Tier::Free).await;
        assert_eq!(idle.count, 0);
        assert_eq!(idle.reset_at_ms, None);
    }

    #[tokio::test]
    async fn reset_clears_both_stores() {
        let (limiter, store, _) = limiter();
        limiter.check_limit("ip1", Tier::Free).await;
        store.go_down();
        limiter.check_limit("ip1", Tier::Free).await;
        store.recover();

        limiter.reset("ip1", None).await;

        assert!(store.live_keys().is_empty());
        store.go_down();
        assert_eq!(limiter.get_usage("ip1", Tier::Free).await.count, 0);
    }

    #[tokio::test]
    async fn reset_single_tier_keeps_others() {
        let (limiter, _, _) = limiter();
        limiter.check_limit("ip1", Tier::Free).await;
        limiter.check_limit("ip1", Tier::Pro).await;

        limiter.reset("ip1", Some(Tier::Free)).await;

        assert_eq!(limiter.get_usage("ip1", Tier::Free).await.count, 0);
        assert_eq!(limiter.get_usage("ip1", Tier::Pro).await.count, 1);
    }
}
