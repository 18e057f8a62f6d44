//! Upstream feed transport port.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::SubscriptionKey;
use crate::error::Result;

/// One session with the upstream feed.
///
/// A transport is opened once and discarded after it fails or closes; the
/// feed manager asks its [`TransportFactory`] for a fresh instance on every
/// (re)connect.
#[async_trait]
pub trait FeedTransport: Send {
    /// Perform the handshake.
    async fn open(&mut self) -> Result<()>;

    /// Ask the upstream to start sending updates for `key`.
    async fn subscribe(&mut self, key: &SubscriptionKey) -> Result<()>;

    /// Ask the upstream to stop sending updates for `key`.
    async fn unsubscribe(&mut self, key: &SubscriptionKey) -> Result<()>;

    /// Next raw inbound text message.
    ///
    /// `None` means the peer closed the session; `Some(Err(_))` is a
    /// transport failure. Both end the session.
    async fn next_message(&mut self) -> Option<Result<String>>;

    /// Close the session. Errors are ignored; the transport is dropped next.
    async fn close(&mut self);

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}

/// Creates a new, unopened transport for each connection attempt.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn FeedTransport> + Send + Sync>;
