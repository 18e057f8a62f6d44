//! Outbound ports (driven side): interfaces implemented by outbound adapters.

pub mod clock;
pub mod store;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use store::{KeyValueStore, WindowCounter};
pub use transport::{FeedTransport, TransportFactory};
