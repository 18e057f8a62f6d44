//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`transport`] - [`MockFeed`](transport::MockFeed), a scriptable upstream
//!   and its per-session [`FeedTransport`](crate::port::outbound::FeedTransport).
//! - [`store`] - [`MemoryStore`](store::MemoryStore), an in-memory
//!   [`KeyValueStore`](crate::port::outbound::KeyValueStore) with failure injection.
//! - [`clock`] - [`ManualClock`](clock::ManualClock) for window and TTL tests.
//! - [`config`] - Canonical test configurations.

pub mod clock;
pub mod config;
pub mod store;
pub mod transport;
