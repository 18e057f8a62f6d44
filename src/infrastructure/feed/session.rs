//! Session lifecycle: handshake, replay, the read loop, and reconnection.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::backoff::RetryStep;
use super::{health, Inner};
use crate::domain::{ConnectionEvent, ConnectionPhase, FeedType, FeedUpdate, SubscriptionKey};
use crate::error::{Error, Result};
use crate::infrastructure::scheduler::ScheduledTask;
use crate::port::outbound::FeedTransport;

/// Channel name the upstream uses for keep-alive frames.
const HEARTBEAT_CHANNEL: &str = "heartbeat";

/// Control frames queued for the live session.
#[derive(Debug)]
pub(super) enum SessionCommand {
    Subscribe(SubscriptionKey),
    Unsubscribe(SubscriptionKey),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    channel: String,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// Open a transport, replay the registry onto it, and publish it as the
/// live session.
///
/// Callers hold `connect_lock` and have set the phase to `Connecting` or
/// `Reconnecting`.
pub(super) async fn open_session(inner: &Arc<Inner>) -> Result<()> {
    let mut transport = (inner.factory)();
    let handshake = inner.config.handshake_timeout();
    match tokio::time::timeout(handshake, transport.open()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err),
        Err(_) => return Err(Error::HandshakeTimeout(handshake)),
    }

    let replay = inner.state.lock().registry.keys();
    let mut sent = HashSet::with_capacity(replay.len());
    for key in &replay {
        // A failed replay is retried on the next session, not this one.
        if let Err(err) = transport.subscribe(key).await {
            warn!(key = %key, error = %err, "Subscription replay failed");
        }
        sent.insert(key.clone());
    }

    let (commands, receiver) = mpsc::unbounded_channel();
    let published = {
        let mut state = inner.state.lock();
        if matches!(
            state.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Reconnecting
        ) {
            // Catch up with subscribe/unsubscribe calls made during replay.
            for key in state.registry.keys() {
                if sent.insert(key.clone()) {
                    let _ = commands.send(SessionCommand::Subscribe(key));
                }
            }
            let dropped: Vec<SubscriptionKey> = sent
                .iter()
                .filter(|key| !state.registry.contains(key))
                .cloned()
                .collect();
            for key in dropped {
                sent.remove(&key);
                let _ = commands.send(SessionCommand::Unsubscribe(key));
            }

            state.generation += 1;
            state.phase = ConnectionPhase::Connected;
            state.attempts = 0;
            state.last_message_at = Some(Instant::now());
            state.sent = sent;
            state.session = Some(commands);
            Some(state.generation)
        } else {
            None
        }
    };

    let Some(generation) = published else {
        transport.close().await;
        return Err(Error::Connection("disconnected during handshake".into()));
    };

    info!(
        transport = transport.name(),
        replayed = replay.len(),
        "Feed connected"
    );
    inner.events.emit(&ConnectionEvent::Connected);

    let session = ScheduledTask::spawn(
        "feed-session",
        run_session(Arc::downgrade(inner), generation, transport, receiver),
    );
    let mut tasks = inner.tasks.lock();
    if inner.state.lock().generation != generation {
        // Superseded by a disconnect; dropping the handle aborts the session.
        return Ok(());
    }
    tasks.session = Some(session);
    if !tasks.health.as_ref().is_some_and(ScheduledTask::is_active) {
        tasks.health = Some(health::spawn_monitor(inner));
    }
    Ok(())
}

/// Own the transport until the session ends.
///
/// Ends when the peer closes, the transport fails, or the manager drops the
/// command sender (disconnect or forced reconnect). Only the first two report
/// a lost session.
async fn run_session(
    inner: Weak<Inner>,
    generation: u64,
    mut transport: Box<dyn FeedTransport>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
) {
    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::Subscribe(key)) => {
                    if let Err(err) = transport.subscribe(&key).await {
                        warn!(key = %key, error = %err, "Subscribe failed");
                    }
                }
                Some(SessionCommand::Unsubscribe(key)) => {
                    if let Err(err) = transport.unsubscribe(&key).await {
                        warn!(key = %key, error = %err, "Unsubscribe failed");
                    }
                }
                None => {
                    debug!(generation, "Session released, closing transport");
                    transport.close().await;
                    return;
                }
            },
            message = transport.next_message() => match message {
                Some(Ok(text)) => match inner.upgrade() {
                    Some(inner) => inner.handle_message(&text),
                    None => {
                        transport.close().await;
                        return;
                    }
                },
                Some(Err(err)) => break err.to_string(),
                None => break "closed by peer".to_string(),
            },
        }
    };

    transport.close().await;
    if let Some(inner) = inner.upgrade() {
        inner.session_lost(generation, reason);
    }
}

/// Retry until a session opens, the attempt budget runs out, or the phase
/// leaves `Reconnecting`.
async fn reconnect_loop(inner: Weak<Inner>) {
    loop {
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let attempt = {
            let mut state = strong.state.lock();
            if state.phase != ConnectionPhase::Reconnecting {
                return;
            }
            state.attempts += 1;
            state.attempts
        };
        let delay = match strong.backoff.step(attempt) {
            RetryStep::Wait(delay) => delay,
            RetryStep::GiveUp => {
                strong.give_up();
                return;
            }
        };

        info!(
            attempt,
            max_attempts = strong.backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to feed"
        );
        strong
            .events
            .emit(&ConnectionEvent::Reconnecting { attempt, delay });
        drop(strong);

        tokio::time::sleep(delay).await;

        let Some(strong) = inner.upgrade() else {
            return;
        };
        let _guard = strong.connect_lock.lock().await;
        if strong.state.lock().phase != ConnectionPhase::Reconnecting {
            return;
        }
        match open_session(&strong).await {
            Ok(()) => {
                info!(attempt, "Feed reconnected");
                return;
            }
            Err(err) => {
                warn!(attempt, error = %err, "Reconnect attempt failed");
                strong.events.emit(&ConnectionEvent::Error {
                    message: err.to_string(),
                });
            }
        }
    }
}

impl Inner {
    /// Decode one inbound frame and deliver it.
    ///
    /// Any well-formed envelope counts as liveness, heartbeats included.
    /// Frames that fail to decode are dropped without touching health.
    pub(super) fn handle_message(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, len = text.len(), "Dropping malformed feed message");
                return;
            }
        };
        self.state.lock().last_message_at = Some(Instant::now());

        if envelope.channel == HEARTBEAT_CHANNEL {
            trace!("Heartbeat");
            return;
        }
        let feed: FeedType = match envelope.channel.parse() {
            Ok(feed) => feed,
            Err(_) => {
                warn!(channel = %envelope.channel, "Dropping message for unknown channel");
                return;
            }
        };

        let update = FeedUpdate {
            key: SubscriptionKey::new(feed, envelope.symbol.as_deref()),
            data: envelope.data,
        };
        let handlers = self.state.lock().registry.handlers_for(&update.key);
        if handlers.is_empty() {
            trace!(key = %update.key, "No subscriber for update");
            return;
        }
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&update))).is_err() {
                warn!(key = %update.key, "Subscription handler panicked");
            }
        }
    }

    /// Move a live session into `Reconnecting`.
    ///
    /// Ignored unless `generation` is still the live session; a late report
    /// from a superseded session must not restart the cycle.
    pub(super) fn session_lost(self: &Arc<Self>, generation: u64, reason: String) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.phase != ConnectionPhase::Connected {
                return;
            }
            state.phase = ConnectionPhase::Reconnecting;
            state.session = None;
            state.sent.clear();
        }
        warn!(reason = %reason, "Feed session lost");
        self.events
            .emit(&ConnectionEvent::Disconnected { reason });
        self.start_reconnect();
    }

    pub(super) fn start_reconnect(self: &Arc<Self>) {
        let task = ScheduledTask::spawn("feed-reconnect", reconnect_loop(Arc::downgrade(self)));
        self.tasks.lock().reconnect = Some(task);
    }

    fn give_up(&self) {
        let attempts = self.backoff.max_attempts();
        {
            let mut state = self.state.lock();
            state.phase = ConnectionPhase::Disconnected;
            state.attempts = attempts;
            state.last_message_at = None;
        }
        let health = self.tasks.lock().health.take();
        drop(health);
        error!(attempts, "Feed reconnection attempts exhausted, giving up");
        self.events
            .emit(&ConnectionEvent::MaxAttemptsReached { attempts });
    }
}
