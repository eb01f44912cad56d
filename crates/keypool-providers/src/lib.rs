//! # Keypool Providers
//!
//! Upstream backends for the keypool dispatcher. Each backend implements
//! `CompletionBackend` and performs exactly one HTTP call per invocation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod openrouter;

pub use openrouter::{OpenRouterBackend, OpenRouterConfig, DEFAULT_BASE_URL};
