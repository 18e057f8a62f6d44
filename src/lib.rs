//! Tidewatch - live market-data plumbing for crypto analytics backends.
//!
//! Three services shared across a process:
//!
//! - **[`FeedManager`](infrastructure::feed::FeedManager)** - one multiplexed
//!   upstream connection with reconnect, health tracking, and subscription replay.
//! - **[`RateLimiter`](infrastructure::limiter::RateLimiter)** - fixed-window
//!   limits per identifier and tier, shared through Redis with a local fallback.
//! - **[`CacheService`](infrastructure::cache::CacheService)** - memory then
//!   Redis then fetcher, with pattern invalidation.
//!
//! # Modules
//!
//! - [`domain`] - Transport- and store-agnostic types
//! - [`port`] - Traits at the I/O seams
//! - [`adapter`] - Redis and WebSocket implementations of the ports
//! - [`infrastructure`] - The services, config, and wiring
//! - [`error`] - Error types for the crate
//!
//! # Example
//!
//! ```no_run
//! use tidewatch::domain::FeedType;
//! use tidewatch::infrastructure::bootstrap::Services;
//! use tidewatch::infrastructure::config::Config;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let services = Services::build(Config::load("config.toml")?).await;
//! services
//!     .feed
//!     .subscribe(FeedType::Ticker, Some("BTCUSDT"), |update| println!("{}", update.data))
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
