//! Taskpulse - background task-execution runtime.
//!
//! This library provides the concurrency core for a serving process:
//! a registry of recurring executors with crash isolation and manual
//! triggering, a time-ordered delay queue backed by a sorted-set
//! collaborator, a rate-limited message delivery bus built on that queue,
//! a self-refreshing read-through cache keyed by access recency, and a
//! generic throttling buffer.
//!
//! # High-Level API
//!
//! ```ignore
//! use taskpulse::runtime::{RuntimeConfig, TaskRuntime};
//!
//! let runtime = TaskRuntime::new(RuntimeConfig::from_env());
//! runtime.register(my_executor);
//! runtime.start().await;
//! ```

pub mod bus;
pub mod cache;
pub mod delay_queue;
pub mod logging;
pub mod runtime;
pub mod store;
pub mod throttle;
pub mod time;

/// Version of the taskpulse library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
