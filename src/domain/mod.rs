//! Transport- and store-agnostic domain types.

pub mod cache;
pub mod connection;
pub mod limit;
pub mod subscription;

pub use cache::{CacheLayer, CacheOptions, CacheStats};
pub use connection::{
    ConnectionEvent, ConnectionPhase, ConnectionQuality, ConnectionStatus, HealthSnapshot,
};
pub use limit::{DecisionSource, RateLimitDecision, RateLimitUsage, Tier, TierProfile};
pub use subscription::{FeedType, FeedUpdate, SubscriptionKey};
