//! Upstream feed connection manager.
//!
//! One [`FeedManager`] owns at most one live transport session and
//! multiplexes any number of logical subscriptions over it.
//!
//! ```text
//!  subscribe()/unsubscribe() ──► registry (ordered) ──► command channel ──┐
//!                                                                         ▼
//!  factory() ─► open ─► replay registry ─► session task ◄── transport.next_message()
//!                                              │
//!                       peer close / error ────┤
//!                       health: silent ────────┴─► reconnect loop (backoff) ─► open ...
//! ```
//!
//! Background work (the session read loop, the reconnect loop, the health
//! monitor) runs as [`ScheduledTask`]s holding only a weak reference to the
//! manager, so dropping the last [`FeedManager`] clone stops everything.

mod backoff;
mod events;
mod health;
mod registry;
mod session;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use backoff::{Backoff, RetryStep};
pub use events::{EventBus, EventListener, EventTopic, ListenerId};
pub use registry::{SubscriptionRegistry, UpdateHandler};

use self::session::SessionCommand;
use crate::domain::{
    ConnectionEvent, ConnectionPhase, ConnectionStatus, FeedType, FeedUpdate, SubscriptionKey,
};
use crate::error::Result;
use crate::infrastructure::config::FeedConfig;
use crate::infrastructure::scheduler::ScheduledTask;
use crate::port::outbound::TransportFactory;

/// How long `disconnect` waits for the session to close its transport.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Mutable connection state. Guarded by one lock so that phase changes,
/// registry edits and the per-session sent set stay consistent.
struct FeedState {
    phase: ConnectionPhase,
    attempts: u32,
    last_message_at: Option<Instant>,
    /// Bumped for every published session and on disconnect.
    generation: u64,
    registry: SubscriptionRegistry,
    /// Keys already sent upstream on the live session.
    sent: HashSet<SubscriptionKey>,
    session: Option<mpsc::UnboundedSender<SessionCommand>>,
}

#[derive(Default)]
struct Tasks {
    session: Option<ScheduledTask>,
    reconnect: Option<ScheduledTask>,
    health: Option<ScheduledTask>,
}

struct Inner {
    config: FeedConfig,
    backoff: Backoff,
    factory: TransportFactory,
    state: Mutex<FeedState>,
    tasks: Mutex<Tasks>,
    events: EventBus,
    /// Serializes handshakes between `connect` and the reconnect loop.
    connect_lock: tokio::sync::Mutex<()>,
}

/// Connection manager for the upstream market-data feed.
///
/// Cheap to clone; clones share the same connection. Construct one per
/// process in the composition root and hand clones to collaborators.
#[derive(Clone)]
pub struct FeedManager {
    inner: Arc<Inner>,
}

impl FeedManager {
    /// Create a manager. Nothing connects until [`connect`](Self::connect)
    /// or the first [`subscribe`](Self::subscribe).
    pub fn new(config: FeedConfig, factory: TransportFactory) -> Self {
        let backoff = Backoff::new(config.reconnection.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                backoff,
                factory,
                state: Mutex::new(FeedState {
                    phase: ConnectionPhase::Disconnected,
                    attempts: 0,
                    last_message_at: None,
                    generation: 0,
                    registry: SubscriptionRegistry::new(),
                    sent: HashSet::new(),
                    session: None,
                }),
                tasks: Mutex::new(Tasks::default()),
                events: EventBus::new(),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Open the session if none exists.
    ///
    /// Returns `Ok` immediately while connected or while a reconnect cycle is
    /// already running. A failed handshake starts the reconnect cycle and is
    /// also returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns the transport or handshake-timeout error of this attempt.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;
        {
            let mut state = self.inner.state.lock();
            match state.phase {
                ConnectionPhase::Connected | ConnectionPhase::Reconnecting => return Ok(()),
                ConnectionPhase::Disconnected => {
                    // A manual connect after giving up starts a fresh cycle.
                    state.phase = ConnectionPhase::Connecting;
                    state.attempts = 0;
                }
                ConnectionPhase::Connecting => {}
            }
        }

        info!(url = %self.inner.config.url, "Connecting to feed");
        match session::open_session(&self.inner).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let retry = {
                    let mut state = self.inner.state.lock();
                    let retry = state.phase == ConnectionPhase::Connecting;
                    if retry {
                        state.phase = ConnectionPhase::Reconnecting;
                    }
                    retry
                };
                warn!(error = %err, "Feed connect failed");
                self.inner.events.emit(&ConnectionEvent::Error {
                    message: err.to_string(),
                });
                if retry {
                    self.inner.start_reconnect();
                }
                Err(err)
            }
        }
    }

    /// Register `handler` for `feed` (optionally scoped to `symbol`) and make
    /// sure the upstream is asked for it.
    ///
    /// Safe to call at any time. Before a session exists the subscription is
    /// stored and sent once one opens. Subscribing an existing key replaces
    /// its handler without sending a second upstream request.
    pub async fn subscribe<F>(
        &self,
        feed: FeedType,
        symbol: Option<&str>,
        handler: F,
    ) -> SubscriptionKey
    where
        F: Fn(&FeedUpdate) + Send + Sync + 'static,
    {
        let key = SubscriptionKey::new(feed, symbol);
        let phase = {
            let mut state = self.inner.state.lock();
            let is_new = state.registry.insert(key.clone(), Arc::new(handler));
            debug!(key = %key, is_new, "Registered subscription");
            if state.phase == ConnectionPhase::Connected && state.sent.insert(key.clone()) {
                if let Some(commands) = &state.session {
                    let _ = commands.send(SessionCommand::Subscribe(key.clone()));
                }
            }
            state.phase
        };

        if matches!(
            phase,
            ConnectionPhase::Disconnected | ConnectionPhase::Connecting
        ) {
            if let Err(err) = self.connect().await {
                debug!(key = %key, error = %err, "Subscription will be sent once connected");
            }
        }
        key
    }

    /// Remove a subscription. Returns false when `key` was not registered.
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let mut state = self.inner.state.lock();
        let removed = state.registry.remove(key);
        if removed && state.sent.remove(key) {
            if let Some(commands) = &state.session {
                let _ = commands.send(SessionCommand::Unsubscribe(key.clone()));
            }
        }
        if removed {
            debug!(key = %key, "Removed subscription");
        }
        removed
    }

    /// Tear everything down: stop reconnecting and health checks, close the
    /// session, and forget all subscriptions.
    pub async fn disconnect(&self) {
        let (was_active, commands) = {
            let mut state = self.inner.state.lock();
            let was_active = state.phase.is_active();
            state.phase = ConnectionPhase::Disconnected;
            state.generation += 1;
            state.attempts = 0;
            state.last_message_at = None;
            state.sent.clear();
            state.registry.clear();
            (was_active, state.session.take())
        };
        let (session, reconnect, health) = {
            let mut tasks = self.inner.tasks.lock();
            (
                tasks.session.take(),
                tasks.reconnect.take(),
                tasks.health.take(),
            )
        };
        drop(reconnect);
        drop(health);
        drop(commands);
        if let Some(session) = session {
            session.finish(CLOSE_GRACE).await;
        }

        if was_active {
            info!("Feed disconnected");
            self.inner.events.emit(&ConnectionEvent::Disconnected {
                reason: "client disconnect".into(),
            });
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let (snapshot, _) = self.inner.snapshot();
        let state = self.inner.state.lock();
        ConnectionStatus {
            connected: snapshot.connected,
            quality: snapshot.quality,
            phase: state.phase,
            reconnect_attempts: state.attempts,
            last_message_age_ms: snapshot.last_update_ms,
        }
    }

    /// Registered subscriptions in replay order.
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.inner.state.lock().registry.keys()
    }

    /// Listen to one kind of connection event.
    pub fn on<F>(&self, topic: EventTopic, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.events.add(topic, Arc::new(listener))
    }

    /// Listen to every connection event.
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.on(EventTopic::Any, listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove(id)
    }
}
