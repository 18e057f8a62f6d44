//! Redis implementation of [`KeyValueStore`].
//!
//! Every call is bounded by the configured timeout so a slow or partitioned
//! Redis degrades callers instead of stalling them. Keys are passed through
//! untouched; callers own namespacing.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::infrastructure::config::StoreConfig;
use crate::port::outbound::{KeyValueStore, WindowCounter};

/// Increment, pin an absolute expiry when the key is new (or has lost it),
/// and report that expiry. One round trip, atomic on the server. Needs
/// Redis 7 for `PEXPIRETIME`.
const INCR_WITH_EXPIRY: &str = r"
local count = redis.call('INCR', KEYS[1])
local reset = redis.call('PEXPIRETIME', KEYS[1])
if count == 1 or reset < 0 then
    local now = redis.call('TIME')
    reset = tonumber(now[1]) * 1000 + math.floor(tonumber(now[2]) / 1000) + tonumber(ARGV[1])
    redis.call('PEXPIREAT', KEYS[1], reset)
end
return {count, reset}
";

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 200;

pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
    incr_script: Script,
}

impl RedisStore {
    /// Connect to the Redis at `config.url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no URL is configured, the URL is invalid, or the
    /// server cannot be reached within the call timeout.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("no store url configured".into()))?;
        let timeout = config.timeout();
        let client = Client::open(url).map_err(StoreError::from)?;
        let conn = bounded(timeout, ConnectionManager::new(client)).await?;

        let store = Self {
            conn,
            timeout,
            incr_script: Script::new(INCR_WITH_EXPIRY),
        };
        store.ping().await?;
        info!(timeout_ms = config.timeout_ms, "Connected to Redis");
        Ok(store)
    }

    /// Round-trip check used at start-up and by the health report.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let reply: String = bounded(self.timeout, redis::cmd("PING").query_async(&mut conn)).await?;
        debug!(reply = %reply, "Redis ping");
        Ok(())
    }
}

async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(|err| match StoreError::from(err) {
            StoreError::Timeout(_) => StoreError::Timeout(limit),
            other => other,
        }),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, redis::cmd("GET").arg(key).query_async(&mut conn)).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let command = redis::cmd("PSETEX").arg(key).arg(millis(ttl)).arg(value).clone();
        bounded(self.timeout, command.query_async::<()>(&mut conn)).await
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCounter, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.incr_script.key(key);
        invocation.arg(millis(window));
        let (count, reset_at_ms): (u64, i64) =
            bounded(self.timeout, invocation.invoke_async(&mut conn)).await?;
        Ok(WindowCounter {
            count,
            reset_at_ms: u64::try_from(reset_at_ms).unwrap_or_default(),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let command = redis::cmd("PEXPIRE").arg(key).arg(millis(ttl)).clone();
        let applied: i64 = bounded(self.timeout, command.query_async(&mut conn)).await?;
        Ok(applied == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        // -2: missing, -1: no expiry.
        let ttl_ms: i64 = bounded(self.timeout, redis::cmd("PTTL").arg(key).query_async(&mut conn)).await?;
        Ok(u64::try_from(ttl_ms).ok().map(Duration::from_millis))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        bounded(self.timeout, redis::cmd("DEL").arg(keys).query_async(&mut conn)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut found = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let command = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .clone();
            let (next, batch): (u64, Vec<String>) =
                bounded(self.timeout, command.query_async(&mut conn)).await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
