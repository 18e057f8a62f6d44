//! Cancelable background tasks.
//!
//! Every timer in the crate (reconnect backoff, health checks, the cache
//! sweeper) runs as a [`ScheduledTask`]. Dropping the handle aborts the task,
//! so an owner that forgets its task also stops it. Timing goes through
//! `tokio::time`, which lets tests drive it with a paused runtime clock.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Handle to a spawned background task.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Run `future` in the background until it completes or is canceled.
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Run `tick` every `period`, first after one full period.
    ///
    /// Ticks never overlap: a slow tick delays the next one rather than
    /// queueing a burst.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(name, async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True until the task finishes or is canceled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort the task. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                debug!(task = self.name, "Canceling scheduled task");
            }
            handle.abort();
        }
    }

    /// Wait up to `limit` for the task to finish on its own, then abort it.
    ///
    /// Returns true when the task finished within the limit.
    pub async fn finish(mut self, limit: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(limit, handle).await {
            Ok(_) => true,
            Err(_) => {
                debug!(task = self.name, "Task did not finish in time, aborting");
                abort.abort();
                false
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
