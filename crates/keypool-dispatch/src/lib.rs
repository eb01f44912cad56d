//! # Keypool Dispatch
//!
//! Dispatches chat completions across a pool of interchangeable credentials:
//! - Fixed key pool with per-key locking
//! - Randomized or sequential key ordering
//! - Cache-first dispatch with retry, rotation and backoff
//! - Read-only statistics snapshots

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod ordering;
pub mod pool;
pub mod stats;

pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, PLACEHOLDER_RESPONSE};
pub use ordering::{create_ordering, KeyOrdering, RandomOrdering, SequentialOrdering};
pub use pool::KeyPool;
pub use stats::{DispatcherStats, KeyStats};
