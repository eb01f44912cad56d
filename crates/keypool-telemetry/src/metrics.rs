//! Prometheus metrics for the dispatcher.
//!
//! Provides metrics for:
//! - Dispatch outcomes (success, cache hit, exhaustion)
//! - Upstream attempts and latency per key
//! - Cache hits and misses
//! - Key health

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use tracing::{debug, error, info};

/// Metrics configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
    /// Metrics path for HTTP endpoint
    pub path: String,
    /// Histogram buckets for upstream latency
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
            latency_buckets: vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ],
        }
    }
}

/// Main metrics registry and collectors
pub struct Metrics {
    registry: Registry,
    requests_total: CounterVec,
    upstream_attempts: CounterVec,
    upstream_latency: HistogramVec,
    cache_operations: CounterVec,
    key_healthy: GaugeVec,
}

impl Metrics {
    /// Metric namespace
    pub const NAMESPACE: &'static str = "keypool";

    /// Create a new metrics instance
    ///
    /// # Errors
    /// Returns error if metrics cannot be registered
    pub fn new(config: &MetricsConfig) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("requests_total", "Dispatch calls by outcome").namespace(Self::NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let upstream_attempts = CounterVec::new(
            Opts::new("upstream_attempts_total", "Upstream calls by key and outcome")
                .namespace(Self::NAMESPACE),
            &["key", "outcome"],
        )?;
        registry.register(Box::new(upstream_attempts.clone()))?;

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new("upstream_latency_seconds", "Upstream call latency in seconds")
                .namespace(Self::NAMESPACE)
                .buckets(config.latency_buckets.clone()),
            &["key"],
        )?;
        registry.register(Box::new(upstream_latency.clone()))?;

        let cache_operations = CounterVec::new(
            Opts::new("cache_operations_total", "Response cache lookups").namespace(Self::NAMESPACE),
            &["result"],
        )?;
        registry.register(Box::new(cache_operations.clone()))?;

        let key_healthy = GaugeVec::new(
            Opts::new("key_healthy", "Key health (1=healthy, 0=excluded)").namespace(Self::NAMESPACE),
            &["key"],
        )?;
        registry.register(Box::new(key_healthy.clone()))?;

        info!("Metrics initialized");

        Ok(Self {
            registry,
            requests_total,
            upstream_attempts,
            upstream_latency,
            cache_operations,
            key_healthy,
        })
    }

    /// Record the outcome of a dispatch call
    pub fn record_request(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    /// Record one upstream attempt
    pub fn record_attempt(&self, key: usize, outcome: &str, latency: Duration) {
        let key = key.to_string();
        self.upstream_attempts
            .with_label_values(&[key.as_str(), outcome])
            .inc();
        self.upstream_latency
            .with_label_values(&[key.as_str()])
            .observe(latency.as_secs_f64());

        debug!(
            key = %key,
            outcome,
            latency_ms = latency.as_millis(),
            "Attempt metrics recorded"
        );
    }

    /// Record a cache lookup
    pub fn record_cache_operation(&self, result: &str) {
        self.cache_operations.with_label_values(&[result]).inc();
    }

    /// Update key health
    pub fn update_key_health(&self, key: usize, healthy: bool) {
        let value = if healthy { 1.0 } else { 0.0 };
        self.key_healthy
            .with_label_values(&[key.to_string().as_str()])
            .set(value);
    }

    /// Get metrics as Prometheus text format
    #[must_use]
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get the Prometheus registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
