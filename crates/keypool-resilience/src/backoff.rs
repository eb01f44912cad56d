//! Exponential backoff between failed attempts.

use std::time::Duration;

/// Backoff configuration for the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Outer attempts over the pool
    pub max_retries: u32,
    /// Delay after a failure in the first attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Create a policy
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Policy that never sleeps, for tests and benchmarks
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after a failure during outer attempt `attempt` (0-based)
    ///
    /// `base * 2^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_immediate_policy() {
        let policy = BackoffPolicy::immediate(2);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay_for(3), Duration::ZERO);
    }
}
