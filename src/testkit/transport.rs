//! Mock [`FeedTransport`] backed by an in-process "upstream".
//!
//! [`MockFeed`] plays the exchange: it decides how each handshake ends,
//! records every control frame the client sends, and lets the test push
//! inbound messages or kill the live session. Its [`factory`](MockFeed::factory)
//! hands the feed manager a fresh [`MockTransport`] per connection attempt.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::SubscriptionKey;
use crate::error::{Error, Result};
use crate::port::outbound::{FeedTransport, TransportFactory};

/// How the next handshake ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Accept,
    Refuse(String),
    /// Never completes; exercises the handshake timeout.
    Hang,
}

/// Direction of a recorded control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOp {
    Subscribe,
    Unsubscribe,
}

/// A control frame as the upstream saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 1-based index of the accepted session that carried the frame.
    pub session: u32,
    pub op: FrameOp,
    pub key: SubscriptionKey,
}

enum Inbound {
    Text(String),
    Fail(String),
    Close,
}

#[derive(Default)]
struct Upstream {
    script: VecDeque<OpenOutcome>,
    open_attempts: u32,
    sessions: u32,
    closes: u32,
    frames: Vec<Frame>,
    failing_keys: HashSet<SubscriptionKey>,
    live: Option<mpsc::UnboundedSender<Inbound>>,
}

/// Control handle for the simulated upstream. Clones share state.
#[derive(Clone, Default)]
pub struct MockFeed {
    upstream: Arc<Mutex<Upstream>>,
}

impl MockFeed {
    /// An upstream that accepts every handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue handshake outcomes; once exhausted every handshake is accepted.
    pub fn with_opens(self, outcomes: Vec<OpenOutcome>) -> Self {
        self.upstream.lock().script.extend(outcomes);
        self
    }

    /// Queue `n` refused handshakes.
    pub fn refuse_next(&self, n: usize) {
        let mut upstream = self.upstream.lock();
        for _ in 0..n {
            upstream
                .script
                .push_back(OpenOutcome::Refuse("connection refused".into()));
        }
    }

    /// Make subscribe frames for `key` fail on every session.
    pub fn fail_subscribe(&self, key: SubscriptionKey) {
        self.upstream.lock().failing_keys.insert(key);
    }

    pub fn factory(&self) -> TransportFactory {
        let upstream = self.upstream.clone();
        Arc::new(move || {
            Box::new(MockTransport {
                upstream: upstream.clone(),
                session: 0,
                inbound: None,
            }) as Box<dyn FeedTransport>
        })
    }

    /// Handshakes attempted, successful or not.
    pub fn open_attempts(&self) -> u32 {
        self.upstream.lock().open_attempts
    }

    /// Handshakes accepted.
    pub fn sessions(&self) -> u32 {
        self.upstream.lock().sessions
    }

    pub fn closes(&self) -> u32 {
        self.upstream.lock().closes
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.upstream.lock().frames.clone()
    }

    /// Keys subscribed on a given session, in send order.
    pub fn subscribed_in(&self, session: u32) -> Vec<SubscriptionKey> {
        self.upstream
            .lock()
            .frames
            .iter()
            .filter(|f| f.session == session && f.op == FrameOp::Subscribe)
            .map(|f| f.key.clone())
            .collect()
    }

    /// Deliver a raw text frame on the live session. False when none is live.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.send(Inbound::Text(text.into()))
    }

    /// Deliver a `{"channel","symbol","data"}` envelope.
    pub fn push_update(&self, channel: &str, symbol: Option<&str>, data: serde_json::Value) -> bool {
        let envelope = serde_json::json!({
            "channel": channel,
            "symbol": symbol,
            "data": data,
        });
        self.push(envelope.to_string())
    }

    /// Peer closes the live session cleanly.
    pub fn drop_session(&self) -> bool {
        self.send(Inbound::Close)
    }

    /// Live session fails with a transport error.
    pub fn fail_session(&self, reason: &str) -> bool {
        self.send(Inbound::Fail(reason.to_string()))
    }

    fn send(&self, inbound: Inbound) -> bool {
        self.upstream
            .lock()
            .live
            .as_ref()
            .is_some_and(|tx| tx.send(inbound).is_ok())
    }
}

/// One client session against a [`MockFeed`].
pub struct MockTransport {
    upstream: Arc<Mutex<Upstream>>,
    session: u32,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
}

impl MockTransport {
    fn record(&self, op: FrameOp, key: &SubscriptionKey) -> Result<()> {
        let mut upstream = self.upstream.lock();
        upstream.frames.push(Frame {
            session: self.session,
            op,
            key: key.clone(),
        });
        if op == FrameOp::Subscribe && upstream.failing_keys.contains(key) {
            return Err(Error::Transport(format!("subscribe rejected for {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedTransport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        let outcome = {
            let mut upstream = self.upstream.lock();
            upstream.open_attempts += 1;
            let outcome = upstream.script.pop_front().unwrap_or(OpenOutcome::Accept);
            if outcome == OpenOutcome::Accept {
                let (tx, rx) = mpsc::unbounded_channel();
                upstream.sessions += 1;
                upstream.live = Some(tx);
                self.session = upstream.sessions;
                self.inbound = Some(rx);
            }
            outcome
        };
        match outcome {
            OpenOutcome::Accept => Ok(()),
            OpenOutcome::Refuse(reason) => Err(Error::Connection(reason)),
            OpenOutcome::Hang => std::future::pending().await,
        }
    }

    async fn subscribe(&mut self, key: &SubscriptionKey) -> Result<()> {
        self.record(FrameOp::Subscribe, key)
    }

    async fn unsubscribe(&mut self, key: &SubscriptionKey) -> Result<()> {
        self.record(FrameOp::Unsubscribe, key)
    }

    async fn next_message(&mut self) -> Option<Result<String>> {
        let Some(inbound) = self.inbound.as_mut() else {
            return std::future::pending().await;
        };
        match inbound.recv().await {
            Some(Inbound::Text(text)) => Some(Ok(text)),
            Some(Inbound::Fail(reason)) => Some(Err(Error::Transport(reason))),
            Some(Inbound::Close) | None => None,
        }
    }

    async fn close(&mut self) {
        self.upstream.lock().closes += 1;
        self.inbound = None;
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
