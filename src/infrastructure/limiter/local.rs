//! In-process fixed-window counters.
//!
//! Used when the shared store cannot be reached. Counts live only as long as
//! the process and are never authoritative across instances.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::domain::Tier;

/// State of one (identifier, tier) window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalWindow {
    pub count: u64,
    pub reset_at_ms: u64,
}

impl LocalWindow {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }
}

/// Fixed-window counters keyed by (identifier, tier), bounded in size.
pub struct LocalWindows {
    windows: Mutex<HashMap<(String, Tier), LocalWindow>>,
    max_entries: usize,
}

impl LocalWindows {
    pub fn new(max_entries: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    /// Count one request.
    ///
    /// Starts a new window when none is open or the previous one lapsed.
    /// Returns `None` when tracking a new identifier would exceed the bound
    /// even after dropping lapsed windows.
    pub fn hit(
        &self,
        identifier: &str,
        tier: Tier,
        window: Duration,
        now_ms: u64,
    ) -> Option<LocalWindow> {
        let mut windows = self.windows.lock();
        let key = (identifier.to_string(), tier);

        if let Some(current) = windows.get_mut(&key) {
            if current.is_expired(now_ms) {
                *current = fresh(window, now_ms);
            } else {
                current.count = current.count.saturating_add(1);
            }
            return Some(*current);
        }

        if windows.len() >= self.max_entries {
            windows.retain(|_, w| !w.is_expired(now_ms));
            if windows.len() >= self.max_entries {
                return None;
            }
        }
        let created = fresh(window, now_ms);
        windows.insert(key, created);
        Some(created)
    }

    /// Current window without counting, if one is open.
    pub fn peek(&self, identifier: &str, tier: Tier, now_ms: u64) -> Option<LocalWindow> {
        self.windows
            .lock()
            .get(&(identifier.to_string(), tier))
            .filter(|w| !w.is_expired(now_ms))
            .copied()
    }

    /// Drop the windows of `identifier` for each of `tiers`.
    pub fn clear(&self, identifier: &str, tiers: &[Tier]) -> usize {
        let mut windows = self.windows.lock();
        tiers
            .iter()
            .filter(|tier| windows.remove(&(identifier.to_string(), **tier)).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fresh(window: Duration, now_ms: u64) -> LocalWindow {
    LocalWindow {
        count: 1,
        reset_at_ms: now_ms + window.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn counts_within_window_and_resets_after() {
        let windows = LocalWindows::new(10);
        assert_eq!(windows.hit("ip1", Tier::Free, MINUTE, 0).unwrap().count, 1);
        let second = windows.hit("ip1", Tier::Free, MINUTE, 30_000).unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.reset_at_ms, 60_000);

        let next = windows.hit("ip1", Tier::Free, MINUTE, 60_000).unwrap();
        assert_eq!(next, LocalWindow { count: 1, reset_at_ms: 120_000 });
    }

    #[test]
    fn tiers_are_counted_separately() {
        let windows = LocalWindows::new(10);
        windows.hit("ip1", Tier::Free, MINUTE, 0);
        windows.hit("ip1", Tier::Free, MINUTE, 0);
        assert_eq!(windows.hit("ip1", Tier::Pro, MINUTE, 0).unwrap().count, 1);
        assert_eq!(windows.peek("ip1", Tier::Free, 0).unwrap().count, 2);
    }

    #[test]
    fn full_map_evicts_lapsed_windows_first() {
        let windows = LocalWindows::new(2);
        windows.hit("a", Tier::Free, MINUTE, 0);
        windows.hit("b", Tier::Free, Duration::from_secs(1), 0);
        assert!(windows.hit("c", Tier::Free, MINUTE, 500).is_none());
        assert!(windows.hit("c", Tier::Free, MINUTE, 1_000).is_some());
        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn clear_removes_requested_tiers() {
        let windows = LocalWindows::new(10);
        windows.hit("ip1", Tier::Free, MINUTE, 0);
        windows.hit("ip1", Tier::Api, MINUTE, 0);
        assert_eq!(windows.clear("ip1", &[Tier::Free]), 1);
        assert!(windows.peek("ip1", Tier::Free, 0).is_none());
        assert!(windows.peek("ip1", Tier::Api, 0).is_some());
        assert_eq!(windows.clear("ip1", &Tier::ALL), 1);
        assert!(windows.is_empty());
    }
}
