//! Infrastructure layer.
//!
//! The three core services and what they run on: configuration, scheduling,
//! health reporting, and runtime wiring.
//!
//! # Submodules
//!
//! - [`bootstrap`] - Composition root for runtime wiring
//! - [`cache`] - Two-tier read-through cache
//! - [`config`] - Configuration loading and validation
//! - [`feed`] - Upstream connection manager
//! - [`health`] - Deployment health report
//! - [`limiter`] - Fixed-window rate limiter
//! - [`scheduler`] - Cancelable background tasks

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod feed;
pub mod health;
pub mod limiter;
pub mod scheduler;
