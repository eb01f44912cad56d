//! Thresholds and horizons that govern key health.

use std::time::Duration;

/// Health policy shared by the health predicate and the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive failures after which a key is quarantined
    pub failure_threshold: u32,
    /// Circuit-open window after the failure threshold is reached
    pub failure_cooldown: Duration,
    /// Pause applied to a rate-limited key
    pub rate_limit_window: Duration,
    /// Circuit-open window after a terminal credit-exhaustion response
    pub credit_exhausted_cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_cooldown: Duration::from_secs(5 * 60),
            rate_limit_window: Duration::from_secs(60),
            credit_exhausted_cooldown: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl HealthPolicy {
    /// Create the default policy
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the failure cooldown
    #[must_use]
    pub fn with_failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.failure_cooldown = cooldown;
        self
    }

    /// Set the rate-limit window
    #[must_use]
    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    /// Set the credit-exhaustion cooldown
    #[must_use]
    pub fn with_credit_exhausted_cooldown(mut self, cooldown: Duration) -> Self {
        self.credit_exhausted_cooldown = cooldown;
        self
    }
}

/// How HTTP 402 responses are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreditPolicy {
    /// The configured model is a free-tier variant
    pub free_model: bool,
    /// Operator override: treat every 402 as transient
    pub treat_402_as_transient: bool,
}

impl CreditPolicy {
    /// Create a credit policy
    #[must_use]
    pub fn new(free_model: bool, treat_402_as_transient: bool) -> Self {
        Self {
            free_model,
            treat_402_as_transient,
        }
    }

    /// Whether a 402 should only rate-limit the key
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.free_model || self.treat_402_as_transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = HealthPolicy::default();
        assert_eq!(policy.failure_threshold, 3);
        assert_eq!(policy.failure_cooldown, Duration::from_secs(300));
        assert_eq!(policy.rate_limit_window, Duration::from_secs(60));
        assert_eq!(policy.credit_exhausted_cooldown, Duration::from_secs(86_400));
    }

    #[test]
    fn test_threshold_never_zero() {
        assert_eq!(HealthPolicy::new().with_failure_threshold(0).failure_threshold, 1);
    }

    #[test]
    fn test_credit_policy() {
        assert!(!CreditPolicy::new(false, false).is_transient());
        assert!(CreditPolicy::new(true, false).is_transient());
        assert!(CreditPolicy::new(false, true).is_transient());
    }
}
