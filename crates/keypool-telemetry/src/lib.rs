//! # Keypool Telemetry
//!
//! Observability for the keypool dispatcher:
//! - Structured logging with tracing
//! - Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

pub use logging::{bootstrap_logging, init_logging, LogFormat, LoggingConfig, LoggingError};
pub use metrics::{Metrics, MetricsConfig};
