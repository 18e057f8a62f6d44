//! Periodic staleness check.

use std::sync::Arc;

use tracing::{debug, warn};

use super::Inner;
use crate::domain::{ConnectionEvent, ConnectionPhase, ConnectionQuality, HealthSnapshot};
use crate::infrastructure::scheduler::ScheduledTask;

pub(super) fn spawn_monitor(inner: &Arc<Inner>) -> ScheduledTask {
    let weak = Arc::downgrade(inner);
    ScheduledTask::every(
        "feed-health",
        inner.config.health.check_interval(),
        move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.check_health();
                }
            }
        },
    )
}

impl Inner {
    /// Current health as seen right now.
    pub(super) fn snapshot(&self) -> (HealthSnapshot, u64) {
        let state = self.state.lock();
        let connected = state.phase == ConnectionPhase::Connected;
        let age = state.last_message_at.map(|at| at.elapsed());
        let quality = match age {
            Some(age) if connected => self.config.health.classify(age),
            _ => ConnectionQuality::Disconnected,
        };
        let snapshot = HealthSnapshot {
            connected,
            quality,
            last_update_ms: age.map(|age| age.as_millis() as u64),
        };
        (snapshot, state.generation)
    }

    /// Classify, publish, and force a reconnect when a connected session has
    /// gone silent past the last threshold.
    pub(super) fn check_health(self: &Arc<Self>) {
        let (snapshot, generation) = self.snapshot();
        debug!(
            quality = %snapshot.quality,
            last_update_ms = ?snapshot.last_update_ms,
            "Feed health check"
        );
        let stale = snapshot.connected && snapshot.quality == ConnectionQuality::Disconnected;
        let silent_ms = snapshot.last_update_ms;
        self.events.emit(&ConnectionEvent::Health(snapshot));

        if stale {
            warn!(silent_ms = ?silent_ms, "Feed silent past threshold, forcing reconnect");
            self.session_lost(generation, "no messages within health threshold".into());
        }
    }
}
