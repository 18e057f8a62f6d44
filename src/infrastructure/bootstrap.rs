//! Composition root: one feed manager, one limiter, one cache per process.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapter::outbound::{RedisStore, WebSocketTransport};
use crate::infrastructure::cache::CacheService;
use crate::infrastructure::config::Config;
use crate::infrastructure::feed::FeedManager;
use crate::infrastructure::health::{health_check, HealthReport};
use crate::infrastructure::limiter::RateLimiter;
use crate::infrastructure::scheduler::ScheduledTask;
use crate::port::outbound::{Clock, KeyValueStore, SystemClock, TransportFactory};

/// Runtime services shared by every collaborator in the process.
pub struct Services {
    config: Config,
    store: Option<Arc<dyn KeyValueStore>>,
    pub feed: FeedManager,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<CacheService>,
    sweeper: ScheduledTask,
}

impl Services {
    /// Wire production adapters from `config`.
    ///
    /// An unreachable store is logged and the limiter and cache run on local
    /// memory only; start-up never fails because of it.
    pub async fn build(config: Config) -> Self {
        let store = connect_store(&config).await;
        let factory = WebSocketTransport::factory(config.feed.url.clone());
        Self::assemble(config, store, factory, Arc::new(SystemClock))
    }

    /// Wire services from explicit parts.
    ///
    /// Must be called inside a tokio runtime (the cache sweeper is spawned).
    pub fn assemble(
        config: Config,
        store: Option<Arc<dyn KeyValueStore>>,
        factory: TransportFactory,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let prefix = config.store.key_prefix.clone();
        let feed = FeedManager::new(config.feed.clone(), factory);
        let limiter = Arc::new(RateLimiter::new(store.clone(), Arc::clone(&clock), prefix.as_str()));
        let cache = Arc::new(CacheService::new(&config.cache, store.clone(), clock, &prefix));
        let sweeper = cache.spawn_sweeper();

        info!(
            shared_store = store.as_ref().map_or("none", |s| s.name()),
            feed_url = %config.feed.url,
            "Services ready"
        );
        Self {
            config,
            store,
            feed,
            limiter,
            cache,
            sweeper,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn has_shared_store(&self) -> bool {
        self.store.is_some()
    }

    pub async fn health_report(&self) -> HealthReport {
        health_check(&self.config, self.store.as_deref()).await
    }

    /// Close the feed and stop background work.
    pub async fn shutdown(mut self) {
        self.feed.disconnect().await;
        self.sweeper.cancel();
        info!("Services stopped");
    }
}

async fn connect_store(config: &Config) -> Option<Arc<dyn KeyValueStore>> {
    config.store.url.as_ref()?;
    match RedisStore::connect(&config.store).await {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            warn!(error = %err, "Shared store unreachable, running memory-only");
            None
        }
    }
}
