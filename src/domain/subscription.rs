//! Feed subscription identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Upstream channel a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Ticker,
    Trades,
    OrderBook,
    Candles,
    Liquidations,
    Funding,
}

impl FeedType {
    /// All feed types, in wire order.
    pub const ALL: [Self; 6] = [
        Self::Ticker,
        Self::Trades,
        Self::OrderBook,
        Self::Candles,
        Self::Liquidations,
        Self::Funding,
    ];

    /// Channel name used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trades => "trades",
            Self::OrderBook => "orderbook",
            Self::Candles => "candles",
            Self::Liquidations => "liquidations",
            Self::Funding => "funding",
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|feed| feed.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownFeed(s.to_string()))
    }
}

/// Identity of a logical subscription: a feed type plus an optional symbol.
///
/// Symbols are normalised to upper case so `btcusdt` and `BTCUSDT` address
/// the same subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    feed: FeedType,
    symbol: Option<String>,
}

impl SubscriptionKey {
    /// Create a key for `feed`, optionally scoped to `symbol`.
    pub fn new(feed: FeedType, symbol: Option<&str>) -> Self {
        let symbol = symbol
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_uppercase);
        Self { feed, symbol }
    }

    /// Key for a feed that is not scoped to any symbol.
    #[must_use]
    pub fn feed_wide(feed: FeedType) -> Self {
        Self { feed, symbol: None }
    }

    #[must_use]
    pub const fn feed(&self) -> FeedType {
        self.feed
    }

    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{}:{}", self.feed, symbol),
            None => write!(f, "{}", self.feed),
        }
    }
}

/// Parses `feed` or `feed:SYMBOL`.
impl FromStr for SubscriptionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((feed, symbol)) => Ok(Self::new(feed.parse()?, Some(symbol))),
            None => Ok(Self::feed_wide(s.parse()?)),
        }
    }
}

/// One decoded inbound update, routed to the handler registered for `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    pub key: SubscriptionKey,
    pub data: serde_json::Value,
}
