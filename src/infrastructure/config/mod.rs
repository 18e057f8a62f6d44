//! Infrastructure configuration modules.

pub mod feed;
pub mod logging;
pub mod settings;
pub mod store;

pub use feed::{FeedConfig, HealthConfig, ReconnectionConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use settings::Config;
pub use store::{CacheConfig, StoreConfig};
