//! Attempt outcome classification.
//!
//! Maps the result of one upstream call to what the dispatch loop should do
//! next and how the key's record changes:
//!
//! | Outcome                          | Record change                      | Disposition |
//! |----------------------------------|------------------------------------|-------------|
//! | success                          | reset failures, record latency     | `Success`   |
//! | 402, paid model                  | circuit open 24h                   | `Rotate`    |
//! | 402, free model or override      | rate-limited 60s                   | `Rotate`    |
//! | other failure, threshold reached | circuit open 5min                  | `Backoff`   |
//! | other failure, rate-limit text   | rate-limited 60s                   | `Backoff`   |
//! | other failure                    | failure counted                    | `Backoff`   |

use crate::key_record::{KeyRecord, KeyUpdate};
use crate::policy::{CreditPolicy, HealthPolicy};
use keypool_core::UpstreamFailure;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;

/// What the dispatch loop does after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Return the response
    Success,
    /// Move to the next key immediately
    Rotate,
    /// Sleep before trying the next key
    Backoff,
}

/// Category of an attempt outcome, used for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// Upstream answered
    Success,
    /// 402 on a paid model
    CreditExhausted,
    /// 402 treated as a temporary condition
    CreditTransient,
    /// Failure that carried a rate-limit signal
    RateLimited,
    /// Failure that tripped the circuit
    CircuitOpened,
    /// Any other failure
    Failure,
}

impl OutcomeClass {
    /// Label used in metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CreditExhausted => "credit_exhausted",
            Self::CreditTransient => "credit_transient",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpened => "circuit_opened",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Next step of the dispatch loop
    pub disposition: Disposition,
    /// Outcome category
    pub class: OutcomeClass,
    /// Change to apply to the key record
    pub update: KeyUpdate,
}

#[allow(clippy::expect_used)]
fn rate_limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)rate[\s_-]?limit").expect("valid regex"))
}

/// Whether an error text signals throttling
#[must_use]
pub fn mentions_rate_limit(text: &str) -> bool {
    rate_limit_pattern().is_match(text)
}

/// Classifies attempt outcomes under a health and credit policy
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    policy: HealthPolicy,
    credit: CreditPolicy,
}

impl Classifier {
    /// Create a classifier
    #[must_use]
    pub fn new(policy: HealthPolicy, credit: CreditPolicy) -> Self {
        Self { policy, credit }
    }

    /// The health policy in force
    #[must_use]
    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// The credit policy in force
    #[must_use]
    pub fn credit_policy(&self) -> CreditPolicy {
        self.credit
    }

    /// Classify a successful call
    #[must_use]
    pub fn success(&self, latency: Duration, now: Instant) -> Classification {
        Classification {
            disposition: Disposition::Success,
            class: OutcomeClass::Success,
            update: KeyUpdate {
                at: now,
                success: true,
                consecutive_failures: 0,
                latency: Some(latency),
                rate_limit_reset_at: None,
                circuit_open_until: None,
            },
        }
    }

    /// Classify a failed call against the key's current record
    #[must_use]
    pub fn failure(&self, record: &KeyRecord, failure: &UpstreamFailure, now: Instant) -> Classification {
        let consecutive_failures = record.consecutive_failures.saturating_add(1);
        let threshold_reached = consecutive_failures >= self.policy.failure_threshold;
        let mut update = KeyUpdate {
            at: now,
            success: false,
            consecutive_failures,
            latency: None,
            rate_limit_reset_at: None,
            circuit_open_until: None,
        };

        if failure.is_credit_exhausted() {
            let class = if self.credit.is_transient() {
                update.rate_limit_reset_at = Some(now + self.policy.rate_limit_window);
                if threshold_reached {
                    update.circuit_open_until = Some(now + self.policy.failure_cooldown);
                }
                OutcomeClass::CreditTransient
            } else {
                update.circuit_open_until = Some(now + self.policy.credit_exhausted_cooldown);
                OutcomeClass::CreditExhausted
            };
            return Classification {
                disposition: Disposition::Rotate,
                class,
                update,
            };
        }

        let class = if threshold_reached {
            update.circuit_open_until = Some(now + self.policy.failure_cooldown);
            OutcomeClass::CircuitOpened
        } else if failure.is_too_many_requests() || mentions_rate_limit(&failure.to_string()) {
            update.rate_limit_reset_at = Some(now + self.policy.rate_limit_window);
            OutcomeClass::RateLimited
        } else {
            OutcomeClass::Failure
        };

        Classification {
            disposition: Disposition::Backoff,
            class,
            update,
        }
    }

    /// Classify an attempt result
    #[must_use]
    pub fn classify(
        &self,
        record: &KeyRecord,
        result: Result<Duration, &UpstreamFailure>,
        now: Instant,
    ) -> Classification {
        match result {
            Ok(latency) => self.success(latency, now),
            Err(failure) => self.failure(record, failure, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keypool_core::Credential;

    fn record(consecutive_failures: u32) -> KeyRecord {
        let mut record = KeyRecord::new(0, Credential::new("sk-test").unwrap());
        record.consecutive_failures = consecutive_failures;
        record
    }

    fn paid() -> Classifier {
        Classifier::new(HealthPolicy::default(), CreditPolicy::new(false, false))
    }

    fn free() -> Classifier {
        Classifier::new(HealthPolicy::default(), CreditPolicy::new(true, false))
    }

    #[test]
    fn test_rate_limit_pattern() {
        assert!(mentions_rate_limit("Rate limit exceeded"));
        assert!(mentions_rate_limit("error: RATE-LIMIT"));
        assert!(mentions_rate_limit("code=rate_limit_exceeded"));
        assert!(mentions_rate_limit("ratelimited"));
        assert!(!mentions_rate_limit("internal server error"));
    }

    #[test]
    fn test_success_resets_failures() {
        let now = Instant::now();
        let result = paid().classify(&record(2), Ok(Duration::from_millis(120)), now);

        assert_eq!(result.disposition, Disposition::Success);
        assert_eq!(result.update.consecutive_failures, 0);
        assert_eq!(result.update.latency, Some(Duration::from_millis(120)));
        assert!(result.update.success);
    }

    #[test]
    fn test_paid_credit_exhaustion_opens_day_long_circuit() {
        let now = Instant::now();
        let failure = UpstreamFailure::status(402, "Insufficient credits");
        let result = paid().failure(&record(0), &failure, now);

        assert_eq!(result.disposition, Disposition::Rotate);
        assert_eq!(result.class, OutcomeClass::CreditExhausted);
        assert_eq!(result.update.circuit_open_until, Some(now + Duration::from_secs(86_400)));
        assert_eq!(result.update.rate_limit_reset_at, None);
        assert_eq!(result.update.consecutive_failures, 1);
    }

    #[test]
    fn test_free_credit_exhaustion_is_transient() {
        let now = Instant::now();
        let failure = UpstreamFailure::status(402, "Insufficient credits");
        let result = free().failure(&record(0), &failure, now);

        assert_eq!(result.disposition, Disposition::Rotate);
        assert_eq!(result.class, OutcomeClass::CreditTransient);
        assert_eq!(result.update.rate_limit_reset_at, Some(now + Duration::from_secs(60)));
        assert_eq!(result.update.circuit_open_until, None);
    }

    #[test]
    fn test_override_makes_credit_exhaustion_transient() {
        let now = Instant::now();
        let classifier = Classifier::new(HealthPolicy::default(), CreditPolicy::new(false, true));
        let failure = UpstreamFailure::status(402, "Insufficient credits");

        let result = classifier.failure(&record(0), &failure, now);
        assert_eq!(result.class, OutcomeClass::CreditTransient);
    }

    #[test]
    fn test_repeated_transient_credit_trips_circuit() {
        let now = Instant::now();
        let failure = UpstreamFailure::status(402, "Insufficient credits");
        let result = free().failure(&record(2), &failure, now);

        assert_eq!(result.update.consecutive_failures, 3);
        assert_eq!(result.update.circuit_open_until, Some(now + Duration::from_secs(300)));
    }

    #[test]
    fn test_generic_failure_backs_off() {
        let now = Instant::now();
        let failure = UpstreamFailure::status(500, "upstream exploded");
        let result = paid().failure(&record(0), &failure, now);

        assert_eq!(result.disposition, Disposition::Backoff);
        assert_eq!(result.class, OutcomeClass::Failure);
        assert_eq!(result.update.consecutive_failures, 1);
        assert_eq!(result.update.circuit_open_until, None);
        assert_eq!(result.update.rate_limit_reset_at, None);
    }

    #[test]
    fn test_rate_limit_text_pauses_key() {
        let now = Instant::now();
        let failure = UpstreamFailure::status(400, "Rate limit exceeded for this key");
        let result = paid().failure(&record(0), &failure, now);

        assert_eq!(result.class, OutcomeClass::RateLimited);
        assert_eq!(result.update.rate_limit_reset_at, Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_too_many_requests_status_pauses_key() {
        let now = Instant::now();
        let failure = UpstreamFailure::status(429, "slow down");
        let result = paid().failure(&record(1), &failure, now);

        assert_eq!(result.class, OutcomeClass::RateLimited);
        assert!(result.update.rate_limit_reset_at.is_some());
    }

    #[test]
    fn test_third_failure_opens_circuit() {
        let now = Instant::now();
        let failure = UpstreamFailure::timeout(Duration::from_secs(120));
        let result = paid().failure(&record(2), &failure, now);

        assert_eq!(result.disposition, Disposition::Backoff);
        assert_eq!(result.class, OutcomeClass::CircuitOpened);
        assert_eq!(result.update.circuit_open_until, Some(now + Duration::from_secs(300)));
    }

    #[test]
    fn test_circuit_takes_precedence_over_rate_limit() {
        let now = Instant::now();
        let failure = UpstreamFailure::status(429, "rate limit");
        let result = paid().failure(&record(2), &failure, now);

        assert_eq!(result.class, OutcomeClass::CircuitOpened);
        assert_eq!(result.update.rate_limit_reset_at, None);
    }
}
