//! Outbound adapters: concrete I/O behind the outbound ports.
//!
//! - [`redis`] - [`RedisStore`](redis::RedisStore), the shared key-value store
//! - [`websocket`] - [`WebSocketTransport`](websocket::WebSocketTransport), the upstream feed

pub mod redis;
pub mod websocket;

pub use self::redis::RedisStore;
pub use self::websocket::WebSocketTransport;
