//! Connection event fan-out.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::domain::ConnectionEvent;

/// Callback for connection events.
pub type EventListener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Opaque handle returned when a listener is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Which events a listener receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Any,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
    Health,
    MaxAttemptsReached,
}

impl EventTopic {
    #[must_use]
    pub fn of(event: &ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::Connected => Self::Connected,
            ConnectionEvent::Disconnected { .. } => Self::Disconnected,
            ConnectionEvent::Reconnecting { .. } => Self::Reconnecting,
            ConnectionEvent::Error { .. } => Self::Error,
            ConnectionEvent::Health(_) => Self::Health,
            ConnectionEvent::MaxAttemptsReached { .. } => Self::MaxAttemptsReached,
        }
    }
}

/// Topic to ordered listener list.
///
/// Listeners for the event's own topic run first, then [`EventTopic::Any`]
/// listeners, each group in the order added. A panicking listener is logged
/// and skipped; the rest still run.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    topics: RwLock<HashMap<EventTopic, Vec<(ListenerId, EventListener)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, topic: EventTopic, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .write()
            .entry(topic)
            .or_default()
            .push((id, listener));
        id
    }

    /// Returns true when the listener was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut topics = self.topics.write();
        for listeners in topics.values_mut() {
            if let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) {
                listeners.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.topics.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: &ConnectionEvent) {
        let listeners: Vec<(ListenerId, EventListener)> = {
            let topics = self.topics.read();
            [EventTopic::of(event), EventTopic::Any]
                .iter()
                .filter_map(|topic| topics.get(topic))
                .flatten()
                .cloned()
                .collect()
        };

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(listener = id.0, event = event.name(), "Event listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventListener {
        let log = log.clone();
        Arc::new(move |event| log.lock().push(format!("{tag}:{}", event.name())))
    }

    #[test]
    fn topic_listeners_run_before_any_listeners() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add(EventTopic::Any, recorder(&log, "any"));
        bus.add(EventTopic::Connected, recorder(&log, "first"));
        bus.add(EventTopic::Connected, recorder(&log, "second"));
        bus.add(EventTopic::Health, recorder(&log, "health"));

        bus.emit(&ConnectionEvent::Connected);

        assert_eq!(
            *log.lock(),
            vec!["first:connected", "second:connected", "any:connected"]
        );
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = bus.add(EventTopic::Any, recorder(&log, "a"));
        assert!(bus.remove(id));
        assert!(!bus.remove(id));
        bus.emit(&ConnectionEvent::Connected);
        assert!(log.lock().is_empty());
        assert!(bus.is_empty());
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add(EventTopic::Any, Arc::new(|_| panic!("listener bug")));
        bus.add(EventTopic::Any, recorder(&log, "ok"));

        bus.emit(&ConnectionEvent::Error {
            message: "boom".into(),
        });

        assert_eq!(*log.lock(), vec!["ok:error"]);
    }
}
