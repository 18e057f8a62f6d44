use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Shared key-value store failures.
///
/// A missing key is never an error: lookups return `Ok(None)`. Every variant
/// here means the store itself could not answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// True when the store could not be reached at all (refused, dropped, timed out).
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped()
        {
            Self::Unavailable(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("gave up reconnecting after {attempts} attempts")]
    MaxReconnectAttempts { attempts: u32 },

    #[error("unknown rate limit tier: {0}")]
    UnknownTier(String),

    #[error("unknown feed type: {0}")]
    UnknownFeed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_covers_unavailable_and_timeout() {
        assert!(StoreError::Unavailable("refused".into()).is_unreachable());
        assert!(StoreError::Timeout(Duration::from_millis(50)).is_unreachable());
        assert!(!StoreError::Protocol("WRONGTYPE".into()).is_unreachable());
    }

    #[test]
    fn store_error_converts_transparently() {
        let err: Error = StoreError::Protocol("bad reply".into()).into();
        assert_eq!(err.to_string(), "store protocol error: bad reply");
    }

    #[test]
    fn max_attempts_message_names_count() {
        let err = Error::MaxReconnectAttempts { attempts: 10 };
        assert_eq!(err.to_string(), "gave up reconnecting after 10 attempts");
    }
}
