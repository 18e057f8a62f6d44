//! Shared key-value store port.
//!
//! The store is multi-process and multi-tenant. Callers namespace their own
//! keys; implementations pass keys through untouched.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Result of an atomic increment-with-expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    /// Counter value after the increment.
    pub count: u64,
    /// Epoch milliseconds at which the counter expires. Set once when the
    /// window opens and reported unchanged by every later increment.
    pub reset_at_ms: u64,
}

/// Operations the core needs from a shared key-value store.
///
/// A missing key is `Ok(None)`; `Err` always means the store could not answer.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value that expires after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Increment a counter in one atomic round trip.
    ///
    /// The expiry is set to `window` from now only when the increment creates
    /// the key, so later increments never extend or move the window.
    async fn incr_with_expiry(&self, key: &str, window: Duration)
        -> Result<WindowCounter, StoreError>;

    /// Set a key's expiry. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining lifetime of a key; `None` when missing or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// List keys matching a glob pattern (`*`, `?`, `[...]`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Store name for logging.
    fn name(&self) -> &'static str;
}
