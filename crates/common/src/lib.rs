//! Shared concurrency primitives for Driftline crates.
//!
//! # Safety and Quality
//!
//! This crate enforces strict safety and quality standards to ensure
//! reliability across all Driftline components.
//!
//! Two primitives live here, both free of chat-domain knowledge:
//! - [`waiters`]: a guarded registry of timeout-bound one-shot waiters
//! - [`retry`]: consecutive-failure tracking with capped, jittered backoff

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod retry;
pub mod waiters;

pub use retry::RetryStrategy;
pub use waiters::{PendingWait, WaitError, WaiterRegistry, WaiterToken};
