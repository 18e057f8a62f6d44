//! Connection lifecycle types shared by the feed manager and its listeners.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Where the feed manager is in its connection state machine.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
///                                                         \-> Disconnected (attempts exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionPhase {
    /// True while a session exists or is being established.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Coarse liveness classification derived from time since the last inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Disconnected,
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the connection, returned by `connection_status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub quality: ConnectionQuality,
    pub phase: ConnectionPhase,
    pub reconnect_attempts: u32,
    /// Milliseconds since the last inbound message, if any arrived this session.
    pub last_message_age_ms: Option<u64>,
}

/// Payload of the periodic health event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub connected: bool,
    pub quality: ConnectionQuality,
    /// Milliseconds since the last inbound message.
    pub last_update_ms: Option<u64>,
}

/// Lifecycle notifications published by the feed manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Error { message: String },
    Health(HealthSnapshot),
    /// Terminal: reconnection gave up. Fires once per exhausted cycle.
    MaxAttemptsReached { attempts: u32 },
}

impl ConnectionEvent {
    /// Short event name for logs and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Error { .. } => "error",
            Self::Health(_) => "health",
            Self::MaxAttemptsReached { .. } => "max_attempts_reached",
        }
    }
}
