//! Per-call timeout for upstream attempts.
//!
//! An attempt that exceeds its deadline is reported as an
//! [`UpstreamFailure`] of kind `Timeout` and classified like any other
//! generic failure.

use keypool_core::UpstreamFailure;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout configuration
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Deadline for one upstream call
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(120),
        }
    }
}

/// Timeout manager
#[derive(Debug, Clone, Default)]
pub struct TimeoutManager {
    config: TimeoutConfig,
}

impl TimeoutManager {
    /// Create a new timeout manager
    #[must_use]
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(TimeoutConfig::default())
    }

    /// Create a manager enforcing `request` per call
    #[must_use]
    pub fn with_request_timeout(request: Duration) -> Self {
        Self::new(TimeoutConfig { request })
    }

    /// Get the request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.config.request
    }

    /// Execute an operation with the request timeout
    ///
    /// # Errors
    /// Returns the operation's own failure, or a timeout failure if the
    /// deadline elapses first
    pub async fn with_timeout<F, T>(&self, future: F) -> Result<T, UpstreamFailure>
    where
        F: Future<Output = Result<T, UpstreamFailure>>,
    {
        self.with_custom_timeout(future, self.config.request).await
    }

    /// Execute an operation with a custom timeout
    ///
    /// # Errors
    /// Returns the operation's own failure, or a timeout failure if the
    /// deadline elapses first
    pub async fn with_custom_timeout<F, T>(
        &self,
        future: F,
        timeout: Duration,
    ) -> Result<T, UpstreamFailure>
    where
        F: Future<Output = Result<T, UpstreamFailure>>,
    {
        if let Ok(result) = tokio::time::timeout(timeout, future).await {
            result
        } else {
            warn!(timeout_ms = timeout.as_millis(), "Upstream call timed out");
            Err(UpstreamFailure::timeout(timeout))
        }
    }
}
