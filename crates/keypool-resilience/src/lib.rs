//! # Keypool Resilience
//!
//! Health and caching building blocks for the keypool dispatcher:
//! - Per-credential health records with a derived health predicate
//! - Outcome classification (credit exhaustion, rate limits, circuit breaking)
//! - Exponential backoff between attempts
//! - Per-call timeout management
//! - Content-addressed response caching with LRU eviction and TTL

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod cache;
pub mod classifier;
pub mod key_record;
pub mod policy;
pub mod timeout;

// Re-export main types
pub use backoff::BackoffPolicy;
pub use cache::{CacheConfig, CacheLookupResult, CacheStats, Fingerprint, ResponseCache};
pub use classifier::{mentions_rate_limit, Classification, Classifier, Disposition, OutcomeClass};
pub use key_record::{KeyRecord, KeyStatus, KeyUpdate, LatencyWindow, LATENCY_WINDOW};
pub use policy::{CreditPolicy, HealthPolicy};
pub use timeout::{TimeoutConfig, TimeoutManager};
