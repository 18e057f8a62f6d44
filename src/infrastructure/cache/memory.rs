//! In-process cache tier.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::KeyPattern;
use crate::port::outbound::Clock;

struct Slot {
    value: String,
    expires_at_ms: u64,
}

/// Serialized values with per-entry expiry and a hard entry bound.
///
/// When full, an insert first drops expired entries and then, if still
/// full, the entry closest to expiry.
pub struct MemoryCache {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        let expired = match self.entries.get(key) {
            Some(slot) if slot.expires_at_ms > now => return Some(slot.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, slot| slot.expires_at_ms <= now);
        }
        None
    }

    pub fn insert(&self, key: &str, value: String, ttl: Duration) {
        let now = self.clock.now_millis();
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room(now);
        }
        self.entries.insert(
            key.to_string(),
            Slot {
                value,
                expires_at_ms: now + ttl.as_millis() as u64,
            },
        );
    }

    fn make_room(&self, now_ms: u64) {
        if self.purge_expired_at(now_ms) > 0 && self.entries.len() < self.max_entries {
            return;
        }
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at_ms)
            .map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            self.entries.remove(&victim);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key matching `pattern`, returning the removed keys.
    pub fn remove_matching(&self, pattern: &KeyPattern) -> Vec<String> {
        let matched: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| pattern.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        matched
            .into_iter()
            .filter(|key| self.entries.remove(key).is_some())
            .collect()
    }

    /// Drop expired entries, returning how many went.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(self.clock.now_millis())
    }

    fn purge_expired_at(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at_ms > now_ms);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
