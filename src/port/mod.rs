//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! The core components talk to the outside world through three seams:
//!
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ FeedManager  │   │ RateLimiter  │   │ CacheService │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            │                  └────────┬─────────┘
//!            ▼                           ▼
//!     ┌──────────────┐           ┌───────────────┐      ┌───────┐
//!     │FeedTransport │           │ KeyValueStore │      │ Clock │
//!     └──────────────┘           └───────────────┘      └───────┘
//! ```

pub mod outbound;

pub use outbound::{Clock, SystemClock};
pub use outbound::{KeyValueStore, WindowCounter};
pub use outbound::{FeedTransport, TransportFactory};
