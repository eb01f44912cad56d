//! Read-only statistics snapshots.

use keypool_resilience::{CacheStats, HealthPolicy, KeyRecord, KeyStatus};
use serde::Serialize;
use std::fmt;
use tokio::time::Instant;

/// Usage and health of one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyStats {
    /// Zero-based pool index
    pub index: usize,
    /// Derived health label
    pub status: KeyStatus,
    /// Successful over total attempts
    pub success_rate: f64,
    /// Attempts made with this key
    pub total_requests: u64,
    /// Attempts that succeeded
    pub successful_requests: u64,
    /// Mean of recent successful latencies
    pub average_latency_ms: f64,
    /// Failures since the last success
    pub consecutive_failures: u32,
}

impl KeyStats {
    /// Summarize a record at `now`
    #[must_use]
    pub fn from_record(record: &KeyRecord, now: Instant, policy: &HealthPolicy) -> Self {
        Self {
            index: record.index(),
            status: record.status(now, policy),
            success_rate: record.success_rate(),
            total_requests: record.total_requests,
            successful_requests: record.successful_requests,
            average_latency_ms: record.average_latency().as_secs_f64() * 1000.0,
            consecutive_failures: record.consecutive_failures,
        }
    }
}

/// Snapshot of the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatcherStats {
    /// Model requests are sent to
    pub model: String,
    /// Number of configured keys
    pub pool_size: usize,
    /// Keys healthy at snapshot time
    pub healthy_keys: usize,
    /// Calls to `make_request`, cache hits included
    pub total_requests: u64,
    /// Calls answered from the cache
    pub cache_hits: u64,
    /// `cache_hits / total_requests`, zero before the first call
    pub cache_hit_ratio: f64,
    /// Cache counters
    pub cache: CacheStats,
    /// Per-key statistics in pool order
    pub keys: Vec<KeyStats>,
}

impl fmt::Display for DispatcherStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "model={} keys={}/{} healthy requests={} cache_hits={} ({:.1}%)",
            self.model,
            self.healthy_keys,
            self.pool_size,
            self.total_requests,
            self.cache_hits,
            self.cache_hit_ratio * 100.0
        )?;
        for key in &self.keys {
            writeln!(
                f,
                "  key {}: {} success_rate={:.1}% requests={} avg_latency={:.0}ms failures={}",
                key.index + 1,
                key.status,
                key.success_rate * 100.0,
                key.total_requests,
                key.average_latency_ms,
                key.consecutive_failures
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keypool_core::Credential;
    use std::time::Duration;

    #[test]
    fn test_key_stats_from_record() {
        let mut record = KeyRecord::new(1, Credential::new("sk-test").unwrap());
        record.total_requests = 4;
        record.successful_requests = 3;
        record.consecutive_failures = 1;
        record.recent_latencies.push(Duration::from_millis(250));
        let now = Instant::now();

        let stats = KeyStats::from_record(&record, now, &HealthPolicy::default());
        assert_eq!(stats.index, 1);
        assert_eq!(stats.status, KeyStatus::Healthy);
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
        assert!((stats.average_latency_ms - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_serialize() {
        let record = KeyRecord::new(0, Credential::new("sk-secret").unwrap());
        let now = Instant::now();
        let stats = DispatcherStats {
            model: "m:free".to_string(),
            pool_size: 1,
            healthy_keys: 1,
            total_requests: 0,
            cache_hits: 0,
            cache_hit_ratio: 0.0,
            cache: CacheStats::default(),
            keys: vec![KeyStats::from_record(&record, now, &HealthPolicy::default())],
        };

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(!json.contains("sk-secret"));
        assert!(stats.to_string().contains("key 1: healthy"));
    }
}
