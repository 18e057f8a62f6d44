//! In-memory [`KeyValueStore`] with failure injection.
//!
//! Expiry follows the injected [`Clock`], so tests share one
//! [`ManualClock`](super::clock::ManualClock) between the store and the
//! component under test and move time explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::infrastructure::cache::KeyPattern;
use crate::port::outbound::{Clock, KeyValueStore, WindowCounter};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_ms: Option<u64>,
}

/// Shared in-memory store. Clones see the same data.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    failure: Arc<Mutex<Option<StoreError>>>,
    calls: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            failure: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make every subsequent call fail with `error` until [`recover`](Self::recover).
    pub fn fail_with(&self, error: StoreError) {
        *self.failure.lock() = Some(error);
    }

    /// Shorthand for an unreachable store.
    pub fn go_down(&self) {
        self.fail_with(StoreError::Unavailable("connection refused".into()));
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Number of trait calls made, including failed ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw read bypassing expiry and failure injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|e| e.value.clone())
    }

    /// Live (unexpired) keys, sorted.
    pub fn live_keys(&self) -> Vec<String> {
        let now = self.clock.now_millis();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| !is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn enter(&self) -> Result<u64, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(self.clock.now_millis()),
        }
    }
}

fn is_expired(entry: &Entry, now_ms: u64) -> bool {
    entry.expires_at_ms.is_some_and(|at| at <= now_ms)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.enter()?;
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if is_expired(e, now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(e) => Ok(Some(e.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.enter()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms: Some(now + millis(ttl)),
            },
        );
        Ok(())
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCounter, StoreError> {
        let now = self.enter()?;
        let mut entries = self.entries.lock();
        let live = entries.get(key).filter(|e| !is_expired(e, now)).cloned();
        let (count, expires_at_ms) = match live {
            Some(entry) => {
                let current: u64 = entry
                    .value
                    .parse()
                    .map_err(|_| StoreError::Protocol("value is not an integer".into()))?;
                (current + 1, entry.expires_at_ms.unwrap_or(now + millis(window)))
            }
            None => (1, now + millis(window)),
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at_ms: Some(expires_at_ms),
            },
        );
        Ok(WindowCounter {
            count,
            reset_at_ms: expires_at_ms,
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.enter()?;
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(e) if !is_expired(e, now) => {
                e.expires_at_ms = Some(now + millis(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.enter()?;
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|e| !is_expired(e, now))
            .and_then(|e| e.expires_at_ms)
            .map(|at| Duration::from_millis(at - now)))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.enter()?;
        let mut entries = self.entries.lock();
        let mut removed = 0;
        for key in keys {
            if let Some(e) = entries.remove(key) {
                if !is_expired(&e, now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.enter()?;
        let pattern = KeyPattern::new(pattern).map_err(|e| StoreError::Protocol(e.to_string()))?;
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(k, e)| !is_expired(e, now) && pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::clock::ManualClock;

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn incr_sets_expiry_only_on_create() {
        let (store, clock) = store();
        let first = store
            .incr_with_expiry("k", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.reset_at_ms, 60_000);

        clock.advance(Duration::from_secs(20));
        let second = store
            .incr_with_expiry("k", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.reset_at_ms, first.reset_at_ms);

        clock.advance(Duration::from_secs(40));
        let fresh = store
            .incr_with_expiry("k", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn failure_injection_hits_every_call() {
        let (store, _) = store();
        store.go_down();
        assert!(store.get("k").await.unwrap_err().is_unreachable());
        store.recover();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn keys_match_globs() {
        let (store, _) = store();
        for key in ["p:cache:a", "p:cache:b", "p:ratelimit:x"] {
            store
                .set_with_expiry(key, "1", Duration::from_secs(10))
                .await
                .unwrap();
        }
        assert_eq!(
            store.keys("p:cache:*").await.unwrap(),
            vec!["p:cache:a".to_string(), "p:cache:b".to_string()]
        );
        assert_eq!(store.keys("p:cache:[^a]").await.unwrap(), vec!["p:cache:b".to_string()]);
    }
}
