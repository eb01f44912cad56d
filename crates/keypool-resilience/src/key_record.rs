//! Per-credential health and usage state.
//!
//! A [`KeyRecord`] is created once per configured credential and lives for
//! the whole process. Health is never stored: [`KeyRecord::is_healthy`]
//! derives it from the record and the current instant on every call.

use crate::policy::HealthPolicy;
use keypool_core::Credential;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Number of latency samples retained per key
pub const LATENCY_WINDOW: usize = 10;

/// Fixed-capacity rolling window of call latencies
#[derive(Debug, Clone, Default)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
}

impl LatencyWindow {
    /// Create an empty window
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    /// Record a sample, dropping the oldest one when full
    pub fn push(&mut self, latency: Duration) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    /// Mean of the retained samples, zero when empty
    #[must_use]
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    /// Number of retained samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Derived health label of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Circuit breaker is open
    CircuitOpen,
    /// Paused after a rate-limit signal
    RateLimited,
    /// Failure gate is shut without an open circuit
    Failed,
    /// Eligible for selection
    Healthy,
}

impl KeyStatus {
    /// Label used in stats and metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::RateLimited => "rate_limited",
            Self::Failed => "failed",
            Self::Healthy => "healthy",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State change computed by the classifier for one attempt
///
/// Counters are absolute so that applying an update is a plain assignment
/// performed under the record's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpdate {
    /// When the attempt finished
    pub at: Instant,
    /// Whether the attempt succeeded
    pub success: bool,
    /// New consecutive failure count
    pub consecutive_failures: u32,
    /// Latency sample to record
    pub latency: Option<Duration>,
    /// New rate-limit horizon, if one is imposed
    pub rate_limit_reset_at: Option<Instant>,
    /// New circuit-open horizon, if the circuit trips
    pub circuit_open_until: Option<Instant>,
}

/// Mutable state of one credential
#[derive(Clone)]
pub struct KeyRecord {
    index: usize,
    credential: Credential,
    /// Last successful attempt
    pub last_success_at: Option<Instant>,
    /// Last failed attempt
    pub last_failure_at: Option<Instant>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Attempts made with this key
    pub total_requests: u64,
    /// Attempts that succeeded
    pub successful_requests: u64,
    /// Key is rate-limited until this instant
    pub rate_limit_reset_at: Option<Instant>,
    /// Circuit breaker is open until this instant
    pub circuit_open_until: Option<Instant>,
    /// Recent successful call latencies
    pub recent_latencies: LatencyWindow,
}

impl KeyRecord {
    /// Create a fresh record for the credential at `index`
    #[must_use]
    pub fn new(index: usize, credential: Credential) -> Self {
        Self {
            index,
            credential,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            total_requests: 0,
            successful_requests: 0,
            rate_limit_reset_at: None,
            circuit_open_until: None,
            recent_latencies: LatencyWindow::new(),
        }
    }

    /// Zero-based position in the pool
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// One-based label used in logs
    #[must_use]
    pub fn label(&self) -> usize {
        self.index + 1
    }

    /// The credential sent upstream
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Whether the circuit is open at `now`
    #[must_use]
    pub fn is_circuit_open(&self, now: Instant) -> bool {
        self.circuit_open_until.is_some_and(|until| now < until)
    }

    /// Whether the key is rate-limited at `now`
    #[must_use]
    pub fn is_rate_limited(&self, now: Instant) -> bool {
        self.rate_limit_reset_at.is_some_and(|until| now < until)
    }

    /// Whether the key may be selected at `now`
    ///
    /// A key is excluded while its circuit is open, while it is rate-limited
    /// and while its failure count has reached the threshold. The failure gate
    /// is lifted once a tripped circuit has expired so the key can be tried
    /// again; a failing trial call trips the circuit anew.
    #[must_use]
    pub fn is_healthy(&self, now: Instant, policy: &HealthPolicy) -> bool {
        if self.is_circuit_open(now) || self.is_rate_limited(now) {
            return false;
        }
        self.consecutive_failures < policy.failure_threshold || self.circuit_open_until.is_some()
    }

    /// Derived status label at `now`
    #[must_use]
    pub fn status(&self, now: Instant, policy: &HealthPolicy) -> KeyStatus {
        if self.is_circuit_open(now) {
            KeyStatus::CircuitOpen
        } else if self.is_rate_limited(now) {
            KeyStatus::RateLimited
        } else if self.is_healthy(now, policy) {
            KeyStatus::Healthy
        } else {
            KeyStatus::Failed
        }
    }

    /// Successful over total attempts, 1.0 before the first attempt
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Mean latency of recent successful calls
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        self.recent_latencies.average()
    }

    /// Apply a classifier update
    pub fn apply(&mut self, update: &KeyUpdate) {
        self.total_requests += 1;
        self.consecutive_failures = update.consecutive_failures;
        if update.success {
            self.successful_requests += 1;
            self.last_success_at = Some(update.at);
        } else {
            self.last_failure_at = Some(update.at);
        }
        if let Some(latency) = update.latency {
            self.recent_latencies.push(latency);
        }
        if let Some(until) = update.rate_limit_reset_at {
            self.rate_limit_reset_at = Some(until);
        }
        if let Some(until) = update.circuit_open_until {
            self.circuit_open_until = Some(until);
        }
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key", &self.label())
            .field("consecutive_failures", &self.consecutive_failures)
            .field("total_requests", &self.total_requests)
            .field("successful_requests", &self.successful_requests)
            .field("rate_limit_reset_at", &self.rate_limit_reset_at)
            .field("circuit_open_until", &self.circuit_open_until)
            .finish_non_exhaustive()
    }
}
