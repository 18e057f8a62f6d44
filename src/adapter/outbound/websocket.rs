//! WebSocket implementation of [`FeedTransport`].
//!
//! Control frames are JSON: `{"op":"subscribe","channel":"ticker","symbol":"BTCUSDT"}`.
//! Inbound text frames are handed to the feed manager unparsed. Pings are
//! answered here and never surface.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use crate::domain::SubscriptionKey;
use crate::error::{Error, Result};
use crate::port::outbound::{FeedTransport, TransportFactory};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Op {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Serialize)]
struct ControlFrame<'a> {
    op: Op,
    channel: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<&'a str>,
}

impl<'a> ControlFrame<'a> {
    fn new(op: Op, key: &'a SubscriptionKey) -> Self {
        Self {
            op,
            channel: key.feed().as_str(),
            symbol: key.symbol(),
        }
    }
}

/// One WebSocket session with the upstream feed.
pub struct WebSocketTransport {
    url: String,
    socket: Option<Socket>,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: None,
        }
    }

    /// Factory producing a fresh transport for `url` on every connect.
    #[must_use]
    pub fn factory(url: impl Into<String>) -> TransportFactory {
        let url = url.into();
        std::sync::Arc::new(move || Box::new(Self::new(url.clone())) as Box<dyn FeedTransport>)
    }

    fn socket(&mut self) -> Result<&mut Socket> {
        self.socket
            .as_mut()
            .ok_or_else(|| Error::Transport("socket not open".into()))
    }

    async fn send_control(&mut self, op: Op, key: &SubscriptionKey) -> Result<()> {
        let json = serde_json::to_string(&ControlFrame::new(op, key))?;
        debug!(frame = %json, "Sending control frame");
        self.socket()?.send(Message::Text(json)).await?;
        Ok(())
    }
}

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn open(&mut self) -> Result<()> {
        let url = url::Url::parse(&self.url)?;
        info!(url = %url, "Connecting to feed");
        let (socket, response) = connect_async(url.as_str()).await?;
        info!(status = %response.status(), "WebSocket connected");
        self.socket = Some(socket);
        Ok(())
    }

    async fn subscribe(&mut self, key: &SubscriptionKey) -> Result<()> {
        self.send_control(Op::Subscribe, key).await
    }

    async fn unsubscribe(&mut self, key: &SubscriptionKey) -> Result<()> {
        self.send_control(Op::Unsubscribe, key).await
    }

    async fn next_message(&mut self) -> Option<Result<String>> {
        let socket = self.socket.as_mut()?;
        loop {
            match socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(data)) => {
                    trace!("Received ping");
                    if let Err(err) = socket.send(Message::Pong(data)).await {
                        return Some(Err(err.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(frame = ?frame, "WebSocket closed by server");
                    return None;
                }
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(err) = socket.close(None).await {
                debug!(error = %err, "WebSocket close failed");
            }
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
