//! Two-tier read-through cache.
//!
//! Lookups go memory → shared store → fetcher. A shared hit is copied back
//! into memory when the call uses both tiers. Values cross tiers as JSON.
//!
//! Memory entries never outlive `memory_max_ttl`, whatever the caller asks
//! for. Concurrent misses on one key each run their own fetcher.

mod memory;
mod pattern;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

pub use memory::MemoryCache;
pub use pattern::KeyPattern;

use crate::domain::{CacheOptions, CacheStats};
use crate::error::{Error, Result};
use crate::infrastructure::config::CacheConfig;
use crate::infrastructure::scheduler::ScheduledTask;
use crate::port::outbound::{Clock, KeyValueStore};

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache with an in-process tier and an optional shared tier.
pub struct CacheService {
    memory: MemoryCache,
    shared: Option<Arc<dyn KeyValueStore>>,
    memory_max_ttl: Duration,
    default_ttl: Duration,
    sweep_interval: Duration,
    namespace: String,
    counters: Counters,
}

impl CacheService {
    pub fn new(
        config: &CacheConfig,
        shared: Option<Arc<dyn KeyValueStore>>,
        clock: Arc<dyn Clock>,
        key_prefix: &str,
    ) -> Self {
        Self {
            memory: MemoryCache::new(clock, config.memory_max_entries),
            shared,
            memory_max_ttl: config.memory_max_ttl(),
            default_ttl: config.default_ttl(),
            sweep_interval: config.sweep_interval(),
            namespace: format!("{key_prefix}:cache:"),
            counters: Counters::default(),
        }
    }

    /// Options using the configured default TTL on both tiers.
    #[must_use]
    pub fn default_options(&self) -> CacheOptions {
        CacheOptions::new(self.default_ttl, Default::default())
    }

    fn shared_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn memory_ttl(&self, requested: Duration) -> Duration {
        requested.min(self.memory_max_ttl)
    }

    /// Return the cached value for `key`, or run `fetcher` and cache its
    /// result.
    ///
    /// `fetcher` runs at most once and only on a miss in every requested
    /// tier. Its error is returned as-is and nothing is cached.
    pub async fn get<T, F, Fut, E>(&self, key: &str, fetcher: F, options: CacheOptions) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if options.layer.uses_memory() {
            if let Some(raw) = self.memory.get(key) {
                match serde_json::from_str(&raw) {
                    Ok(value) => {
                        self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                        trace!(key, "Cache hit (memory)");
                        return Ok(value);
                    }
                    Err(err) => {
                        warn!(key, error = %err, "Discarding undecodable memory entry");
                        self.memory.remove(key);
                    }
                }
            }
        }

        if options.layer.uses_shared() {
            if let Some(raw) = self.shared_get(key).await {
                match serde_json::from_str(&raw) {
                    Ok(value) => {
                        self.counters.shared_hits.fetch_add(1, Ordering::Relaxed);
                        trace!(key, "Cache hit (shared)");
                        if options.layer.uses_memory() && !options.ttl.is_zero() {
                            self.memory.insert(key, raw, self.memory_ttl(options.ttl));
                        }
                        return Ok(value);
                    }
                    Err(err) => warn!(key, error = %err, "Ignoring undecodable shared entry"),
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Cache miss, fetching");
        let value = fetcher().await?;
        match serde_json::to_string(&value) {
            Ok(raw) => self.store(key, raw, options).await,
            Err(err) => warn!(key, error = %err, "Fetched value not cacheable"),
        }
        Ok(value)
    }

    /// Write `value` to the tiers named in `options`.
    ///
    /// Only encoding fails the call; a shared-tier write failure is logged.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: CacheOptions) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store(key, raw, options).await;
        Ok(())
    }

    async fn store(&self, key: &str, raw: String, options: CacheOptions) {
        if options.ttl.is_zero() {
            trace!(key, "Zero TTL, not caching");
            return;
        }
        if options.layer.uses_shared() {
            if let Some(store) = &self.shared {
                if let Err(err) = store
                    .set_with_expiry(&self.shared_key(key), &raw, options.ttl)
                    .await
                {
                    warn!(store = store.name(), key, error = %err, "Shared cache write failed");
                }
            }
        }
        if options.layer.uses_memory() {
            self.memory.insert(key, raw, self.memory_ttl(options.ttl));
        }
    }

    async fn shared_get(&self, key: &str) -> Option<String> {
        let store = self.shared.as_ref()?;
        match store.get(&self.shared_key(key)).await {
            Ok(found) => found,
            Err(err) => {
                warn!(store = store.name(), key, error = %err, "Shared cache read failed, treating as miss");
                None
            }
        }
    }

    /// Remove every key matching `pattern` from both tiers. The pattern uses
    /// Redis `MATCH` syntax in both tiers.
    ///
    /// Returns the number of distinct keys removed. Fails only on an invalid
    /// pattern; shared-tier errors are logged and skipped.
    pub async fn invalidate(&self, pattern: &str) -> Result<usize> {
        let matcher = KeyPattern::new(pattern)?;
        let mut removed: BTreeSet<String> = self.memory.remove_matching(&matcher).into_iter().collect();

        if let Some(store) = &self.shared {
            let shared_pattern = format!("{}{}", KeyPattern::escape(&self.namespace), pattern);
            match self.purge_shared(store.as_ref(), &shared_pattern).await {
                Ok(keys) => removed.extend(keys),
                Err(err) => {
                    warn!(store = store.name(), pattern, error = %err, "Shared cache invalidation failed");
                }
            }
        }

        debug!(pattern, removed = removed.len(), "Cache invalidated");
        Ok(removed.len())
    }

    async fn purge_shared(
        &self,
        store: &dyn KeyValueStore,
        pattern: &str,
    ) -> std::result::Result<Vec<String>, crate::error::StoreError> {
        let keys = store.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        store.delete(&keys).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.namespace).map(str::to_string))
            .collect())
    }

    #[must_use]
    pub fn get_stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            shared_hits: self.counters.shared_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            memory_entries: self.memory.len(),
            shared_enabled: self.shared.is_some(),
        }
    }

    /// Flush both tiers and zero the counters.
    pub async fn clear(&self) {
        self.memory.clear();
        if let Some(store) = &self.shared {
            let pattern = format!("{}*", KeyPattern::escape(&self.namespace));
            if let Err(err) = self.purge_shared(store.as_ref(), &pattern).await {
                warn!(store = store.name(), error = %err, "Shared cache flush failed");
            }
        }
        self.counters.memory_hits.store(0, Ordering::Relaxed);
        self.counters.shared_hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
    }

    /// Periodically drop expired memory entries.
    pub fn spawn_sweeper(self: &Arc<Self>) -> ScheduledTask {
        let weak = Arc::downgrade(self);
        ScheduledTask::every("cache-sweeper", self.sweep_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(cache) = weak.upgrade() {
                    let purged = cache.memory.purge_expired();
                    if purged > 0 {
                        debug!(purged, remaining = cache.memory.len(), "Swept expired cache entries");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde::Deserialize;

    use super::*;
    use crate::domain::CacheLayer;
    use crate::error::StoreError;
    use crate::testkit::clock::ManualClock;
    use crate::testkit::config;
    use crate::testkit::store::MemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quote {
        symbol: String,
        price: f64,
    }

    fn quote(price: f64) -> Quote {
        Quote {
            symbol: "BTCUSDT".into(),
            price,
        }
    }

    struct Fixture {
        cache: CacheService,
        store: MemoryStore,
        clock: ManualClock,
        fetches: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::default();
            let store = MemoryStore::new(Arc::new(clock.clone()));
            let cache = CacheService::new(
                &config::cache(),
                Some(Arc::new(store.clone())),
                Arc::new(clock.clone()),
                "tw",
            );
            Self {
                cache,
                store,
                clock,
                fetches: Arc::new(AtomicUsize::new(0)),
            }
        }

        async fn get(&self, key: &str, price: f64, options: CacheOptions) -> Quote {
            let fetches = Arc::clone(&self.fetches);
            self.cache
                .get(
                    key,
                    || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, std::io::Error>(quote(price))
                    },
                    options,
                )
                .await
                .unwrap()
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn miss_fetches_once_then_hits_memory() {
        let fx = Fixture::new();
        let opts = CacheOptions::ttl_secs(300);

        assert_eq!(fx.get("price:BTC", 1.0, opts).await, quote(1.0));
        assert_eq!(fx.get("price:BTC", 2.0, opts).await, quote(1.0));

        assert_eq!(fx.fetches(), 1);
        let stats = fx.cache.get_stats();
        assert_eq!((stats.memory_hits, stats.shared_hits, stats.misses), (1, 0, 1));
        assert!(fx.store.peek("tw:cache:price:BTC").is_some());
    }

    #[tokio::test]
    async fn memory_ttl_is_capped_and_shared_hit_backfills() {
        let fx = Fixture::new();
        let opts = CacheOptions::ttl_secs(300);
        fx.get("k", 1.0, opts).await;

        // Memory cap is 60s; the shared copy lives for 300s.
        fx.clock.advance(Duration::from_secs(61));
        assert_eq!(fx.get("k", 2.0, opts).await, quote(1.0));
        assert_eq!(fx.cache.get_stats().shared_hits, 1);

        fx.store.go_down();
        assert_eq!(fx.get("k", 3.0, opts).await, quote(1.0));
        assert_eq!(fx.cache.get_stats().memory_hits, 1);
        assert_eq!(fx.fetches(), 1);
    }

    #[tokio::test]
    async fn fetcher_error_propagates_and_is_not_cached() {
        let fx = Fixture::new();
        let result: std::result::Result<Quote, String> = fx
            .cache
            .get("k", || async { Err("upstream 503".to_string()) }, CacheOptions::ttl_secs(60))
            .await;
        assert_eq!(result.unwrap_err(), "upstream 503");
        assert_eq!(fx.cache.get_stats().memory_entries, 0);
        assert!(fx.store.live_keys().is_empty());

        assert_eq!(fx.get("k", 4.0, CacheOptions::ttl_secs(60)).await, quote(4.0));
        assert_eq!(fx.fetches(), 1);
    }

    #[tokio::test]
    async fn unreachable_shared_tier_is_a_miss() {
        let fx = Fixture::new();
        fx.store.fail_with(StoreError::Unavailable("connection refused".into()));
        let opts = CacheOptions::ttl_secs(60).with_layer(CacheLayer::Shared);

        assert_eq!(fx.get("k", 1.0, opts).await, quote(1.0));
        assert_eq!(fx.get("k", 2.0, opts).await, quote(2.0));
        assert_eq!(fx.fetches(), 2);
        assert_eq!(fx.cache.get_stats().misses, 2);
    }

    #[tokio::test]
    async fn layer_selection_limits_writes() {
        let fx = Fixture::new();
        fx.get("mem", 1.0, CacheOptions::ttl_secs(60).with_layer(CacheLayer::Memory)).await;
        fx.get("shared", 1.0, CacheOptions::ttl_secs(60).with_layer(CacheLayer::Shared)).await;

        assert_eq!(fx.store.live_keys(), vec!["tw:cache:shared".to_string()]);
        assert_eq!(fx.cache.get_stats().memory_entries, 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_never_stored() {
        let fx = Fixture::new();
        let opts = CacheOptions::new(Duration::ZERO, CacheLayer::Both);
        fx.get("k", 1.0, opts).await;
        fx.get("k", 1.0, opts).await;
        assert_eq!(fx.fetches(), 2);
        assert!(fx.store.live_keys().is_empty());
    }

    #[tokio::test]
    async fn invalidate_clears_both_tiers_and_forces_refetch() {
        let fx = Fixture::new();
        let opts = CacheOptions::ttl_secs(300);
        fx.get("price:BTC", 1.0, opts).await;
        fx.get("price:ETH", 1.0, opts).await;
        fx.get("volume:BTC", 1.0, opts).await;
        fx.cache
            .set("price:SOL", &quote(9.0), opts.with_layer(CacheLayer::Shared))
            .await
            .unwrap();

        let removed = fx.cache.invalidate("price:*").await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(fx.store.live_keys(), vec!["tw:cache:volume:BTC".to_string()]);

        assert_eq!(fx.get("price:BTC", 2.0, opts).await, quote(2.0));
        assert_eq!(fx.fetches(), 4);
    }

    #[tokio::test]
    async fn memory_only_invalidate_uses_store_pattern_dialect() {
        let clock = ManualClock::default();
        let cache = CacheService::new(&config::cache(), None, Arc::new(clock), "tw");
        let opts = CacheOptions::ttl_secs(60);
        for key in ["a1", "b1", "k*", "kx", "price:BTC"] {
            cache.set(key, &quote(1.0), opts).await.unwrap();
        }

        assert_eq!(cache.invalidate("[^a]1").await.unwrap(), 1);
        assert_eq!(cache.invalidate("k\\*").await.unwrap(), 1);
        assert_eq!(cache.invalidate("price:**").await.unwrap(), 1);
        assert_eq!(cache.get_stats().memory_entries, 2);

        let cache = &cache;
        let left = move |key: &'static str| async move {
            cache
                .get(key, || async { Err::<Quote, _>(std::io::Error::other("miss")) }, opts)
                .await
                .is_ok()
        };
        assert!(left("a1").await);
        assert!(left("kx").await);
        assert!(!left("b1").await);
    }

    #[tokio::test]
    async fn both_tiers_agree_on_negated_sets() {
        let fx = Fixture::new();
        let opts = CacheOptions::ttl_secs(300);
        fx.get("a1", 1.0, opts).await;
        fx.get("b1", 1.0, opts).await;

        assert_eq!(fx.cache.invalidate("[^a]1").await.unwrap(), 1);
        assert_eq!(fx.store.live_keys(), vec!["tw:cache:a1".to_string()]);
        assert_eq!(fx.cache.get_stats().memory_entries, 1);
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let fx = Fixture::new();
        assert!(matches!(fx.cache.invalidate("price:[").await, Err(Error::Pattern(_))));
    }

    #[tokio::test]
    async fn set_survives_shared_write_failure() {
        let fx = Fixture::new();
        fx.store.go_down();
        fx.cache
            .set("k", &quote(5.0), CacheOptions::ttl_secs(60))
            .await
            .unwrap();
        assert_eq!(fx.get("k", 6.0, CacheOptions::ttl_secs(60)).await, quote(5.0));
        assert_eq!(fx.fetches(), 0);
    }

    #[tokio::test]
    async fn clear_flushes_tiers_and_counters() {
        let fx = Fixture::new();
        fx.get("a", 1.0, CacheOptions::ttl_secs(60)).await;
        fx.get("a", 1.0, CacheOptions::ttl_secs(60)).await;

        fx.cache.clear().await;

        assert_eq!(fx.cache.get_stats(), CacheStats { shared_enabled: true, ..Default::default() });
        assert!(fx.store.live_keys().is_empty());
    }

    #[tokio::test]
    async fn memory_only_service_reports_no_shared_tier() {
        let clock = ManualClock::default();
        let cache = CacheService::new(&config::cache(), None, Arc::new(clock), "tw");
        let value: Quote = cache
            .get("k", || async { Ok::<_, std::io::Error>(quote(1.0)) }, cache.default_options())
            .await
            .unwrap();
        assert_eq!(value, quote(1.0));
        assert!(!cache.get_stats().shared_enabled);
        assert_eq!(cache.get_stats().memory_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_entries() {
        let clock = ManualClock::default();
        let cache = Arc::new(CacheService::new(&config::cache(), None, Arc::new(clock.clone()), "tw"));
        cache.set("k", &quote(1.0), CacheOptions::ttl_secs(5)).await.unwrap();
        let _sweeper = cache.spawn_sweeper();

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(cache.get_stats().memory_entries, 0);
    }
}
