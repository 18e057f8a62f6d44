//! Ordered subscription registry.

use std::sync::Arc;

use crate::domain::{FeedUpdate, SubscriptionKey};

/// Callback invoked for every update routed to a subscription.
pub type UpdateHandler = Arc<dyn Fn(&FeedUpdate) + Send + Sync>;

struct Subscription {
    key: SubscriptionKey,
    handler: UpdateHandler,
}

/// Subscriptions in registration order, unique by key.
///
/// Registration order is the replay order after a reconnect. Replacing the
/// handler of an existing key keeps its original position.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace. Returns true when `key` is new.
    pub fn insert(&mut self, key: SubscriptionKey, handler: UpdateHandler) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|s| s.key == key) {
            existing.handler = handler;
            return false;
        }
        self.entries.push(Subscription { key, handler });
        true
    }

    /// Returns true when `key` was registered.
    pub fn remove(&mut self, key: &SubscriptionKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| &s.key != key);
        self.entries.len() != before
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.iter().any(|s| &s.key == key)
    }

    /// Keys in registration order.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.entries.iter().map(|s| s.key.clone()).collect()
    }

    /// Handlers an update for `key` is routed to: the exact subscription,
    /// then the feed-wide one for the same feed type.
    pub fn handlers_for(&self, key: &SubscriptionKey) -> Vec<UpdateHandler> {
        let wide = SubscriptionKey::feed_wide(key.feed());
        let mut handlers = Vec::new();
        if let Some(exact) = self.entries.iter().find(|s| &s.key == key) {
            handlers.push(exact.handler.clone());
        }
        if key.symbol().is_some() {
            if let Some(feed_wide) = self.entries.iter().find(|s| s.key == wide) {
                handlers.push(feed_wide.handler.clone());
            }
        }
        handlers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
