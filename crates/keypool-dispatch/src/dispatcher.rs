//! The request dispatcher.
//!
//! [`Dispatcher::make_request`] answers a conversation from the cache when it
//! can. Otherwise it walks the pool in a fresh order on each outer attempt,
//! skipping keys that are unhealthy at that moment, and classifies every
//! upstream outcome into a record update plus a next step (return, rotate or
//! back off).

use crate::ordering::{KeyOrdering, RandomOrdering};
use crate::pool::KeyPool;
use crate::stats::{DispatcherStats, KeyStats};
use keypool_core::{
    system_clock, validate_messages, ChatMessage, Clock, CompletionBackend, CompletionRequest,
    Credential, DispatchError, DispatchResult, MaxTokens, ModelId, UpstreamFailure,
};
use keypool_resilience::{
    BackoffPolicy, CacheConfig, CacheLookupResult, Classifier, CreditPolicy, Disposition,
    Fingerprint, HealthPolicy, KeyStatus, OutcomeClass, ResponseCache, TimeoutManager,
};
use keypool_telemetry::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Text returned when no credential is configured
pub const PLACEHOLDER_RESPONSE: &str =
    "Placeholder: No API keys configured. Please set OPENROUTER_API_KEY_1 in .env for real responses.";

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Model sent upstream
    pub model: ModelId,
    /// Outer attempts and delays
    pub backoff: BackoffPolicy,
    /// Health thresholds
    pub health: HealthPolicy,
    /// Treat every 402 as transient
    pub treat_402_as_transient: bool,
    /// Response cache settings
    pub cache: CacheConfig,
    /// Deadline for each upstream call
    pub request_timeout: Duration,
}

impl DispatcherConfig {
    /// Create a configuration with defaults for `model`
    #[must_use]
    pub fn new(model: ModelId) -> Self {
        Self {
            model,
            backoff: BackoffPolicy::default(),
            health: HealthPolicy::default(),
            treat_402_as_transient: false,
            cache: CacheConfig::default(),
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Set the backoff policy
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the health policy
    #[must_use]
    pub fn with_health(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    /// Treat every 402 as transient
    #[must_use]
    pub fn with_402_as_transient(mut self, transient: bool) -> Self {
        self.treat_402_as_transient = transient;
        self
    }

    /// Set the cache configuration
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Credit policy implied by the model and override flag
    #[must_use]
    pub fn credit_policy(&self) -> CreditPolicy {
        CreditPolicy::new(self.model.is_free(), self.treat_402_as_transient)
    }
}

/// Dispatches completions across a pool of credentials
pub struct Dispatcher {
    config: DispatcherConfig,
    backend: Arc<dyn CompletionBackend>,
    pool: KeyPool,
    cache: ResponseCache,
    classifier: Classifier,
    timeouts: TimeoutManager,
    ordering: Box<dyn KeyOrdering>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher builder
    #[must_use]
    pub fn builder(config: DispatcherConfig, backend: Arc<dyn CompletionBackend>) -> DispatcherBuilder {
        DispatcherBuilder::new(config, backend)
    }

    /// Complete a conversation
    ///
    /// Returns the fixed placeholder when no credential is configured,
    /// whatever the input.
    ///
    /// # Errors
    /// Returns `DispatchError::Validation` for an empty conversation or a
    /// zero token budget, and `DispatchError::PoolExhausted` when no
    /// attempt succeeded
    #[instrument(skip_all, fields(model = %self.config.model, messages = messages.len()))]
    pub async fn make_request(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> DispatchResult<String> {
        if self.pool.is_empty() {
            self.total_requests.fetch_add(1, Ordering::Relaxed);
            warn!("No API keys configured, returning placeholder");
            self.record_request("placeholder");
            return Ok(PLACEHOLDER_RESPONSE.to_string());
        }

        validate_messages(&messages)?;
        let max_tokens = MaxTokens::new(max_tokens)?;

        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let request = CompletionRequest::new(self.config.model.clone(), messages, max_tokens);
        let fingerprint = Fingerprint::from_request(&request);

        let (cached, lookup) = self.cache.lookup(&fingerprint);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_operation(lookup.as_str());
        }
        if let Some(text) = cached {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Returning cached response");
            self.record_request("cache_hit");
            return Ok(text);
        }
        if lookup == CacheLookupResult::Miss {
            debug!(fingerprint = %fingerprint, "Cache miss, dispatching upstream");
        }

        match self.dispatch(&request).await {
            Ok(text) => {
                self.cache.put(fingerprint, text.clone());
                self.record_request("success");
                Ok(text)
            }
            Err(err) => {
                self.record_request("exhausted");
                Err(err)
            }
        }
    }

    async fn dispatch(&self, request: &CompletionRequest) -> DispatchResult<String> {
        let policy = self.classifier.policy();
        let mut attempts = 0;
        let mut last_failure: Option<UpstreamFailure> = None;

        for attempt in 0..self.config.backoff.max_retries {
            if self.pool.healthy_indices(self.clock.now(), policy).is_empty() {
                warn!(attempt = attempt + 1, "No healthy API keys available");
                break;
            }
            attempts += 1;

            for index in self.ordering.order(self.pool.len()) {
                if !self.pool.is_healthy(index, self.clock.now(), policy) {
                    continue;
                }
                let Some(credential) = self.credential(index) else {
                    continue;
                };

                debug!(key = index + 1, attempt = attempt + 1, "Trying API key");
                let started = self.clock.now();
                let result = self
                    .timeouts
                    .with_timeout(self.backend.complete(&credential, request))
                    .await;
                let now = self.clock.now();
                let latency = now.saturating_duration_since(started);

                let (disposition, class) = self.apply_outcome(index, result.as_ref().map(|_| latency), now);
                if let Some(metrics) = &self.metrics {
                    metrics.record_attempt(index + 1, class.as_str(), latency);
                }

                let failure = match result {
                    Ok(text) => {
                        info!(
                            key = index + 1,
                            attempt = attempt + 1,
                            latency_ms = latency.as_millis(),
                            "Request succeeded"
                        );
                        return Ok(text);
                    }
                    Err(failure) => failure,
                };

                match disposition {
                    Disposition::Rotate => {
                        warn!(
                            key = index + 1,
                            status = ?failure.status,
                            outcome = %class,
                            "Credit exhaustion, rotating to next key"
                        );
                    }
                    Disposition::Backoff => {
                        let delay = self.config.backoff.delay_for(attempt);
                        warn!(
                            key = index + 1,
                            attempt = attempt + 1,
                            status = ?failure.status,
                            outcome = %class,
                            delay_ms = delay.as_millis(),
                            error = %failure,
                            "API request failed"
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    Disposition::Success => {}
                }
                last_failure = Some(failure);
            }
        }

        let err = DispatchError::pool_exhausted(
            attempts,
            self.pool.len(),
            last_failure.map(|failure| failure.to_string()),
        );
        warn!(attempts, pool_size = self.pool.len(), "All API requests failed");
        Err(err)
    }

    fn credential(&self, index: usize) -> Option<Credential> {
        self.pool.lock(index).map(|record| record.credential().clone())
    }

    fn apply_outcome(
        &self,
        index: usize,
        result: Result<Duration, &UpstreamFailure>,
        now: tokio::time::Instant,
    ) -> (Disposition, OutcomeClass) {
        let Some(mut record) = self.pool.lock(index) else {
            return (Disposition::Backoff, OutcomeClass::Failure);
        };
        let classification = self.classifier.classify(&record, result, now);
        record.apply(&classification.update);

        if let Some(metrics) = &self.metrics {
            metrics.update_key_health(index + 1, record.is_healthy(now, self.classifier.policy()));
        }
        if classification.class == OutcomeClass::CircuitOpened {
            warn!(
                key = index + 1,
                consecutive_failures = record.consecutive_failures,
                "Circuit breaker opened"
            );
        }
        (classification.disposition, classification.class)
    }

    fn record_request(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(outcome);
        }
    }

    /// Read-only snapshot of the dispatcher
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let now = self.clock.now();
        let policy = self.classifier.policy();
        let keys: Vec<KeyStats> = self
            .pool
            .snapshot()
            .iter()
            .map(|record| KeyStats::from_record(record, now, policy))
            .collect();
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_hit_ratio = if total_requests == 0 {
            0.0
        } else {
            cache_hits as f64 / total_requests as f64
        };

        DispatcherStats {
            model: self.config.model.to_string(),
            pool_size: self.pool.len(),
            healthy_keys: keys.iter().filter(|k| k.status == KeyStatus::Healthy).count(),
            total_requests,
            cache_hits,
            cache_hit_ratio,
            cache: self.cache.stats(),
            keys,
        }
    }

    /// Push current key health to the metrics gauges
    pub fn publish_key_health(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let now = self.clock.now();
        for record in self.pool.snapshot() {
            metrics.update_key_health(record.label(), record.is_healthy(now, self.classifier.policy()));
        }
    }

    /// Number of keys healthy right now
    #[must_use]
    pub fn healthy_key_count(&self) -> usize {
        self.pool
            .healthy_indices(self.clock.now(), self.classifier.policy())
            .len()
    }

    /// Number of configured keys
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// The key pool
    #[must_use]
    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    /// The response cache
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Name of the ordering strategy
    #[must_use]
    pub fn ordering_name(&self) -> &'static str {
        self.ordering.name()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("model", &self.config.model)
            .field("backend", &self.backend.name())
            .field("pool_size", &self.pool.len())
            .field("ordering", &self.ordering.name())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Dispatcher`]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    backend: Arc<dyn CompletionBackend>,
    credentials: Vec<Credential>,
    ordering: Option<Box<dyn KeyOrdering>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<Metrics>>,
}

impl DispatcherBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new(config: DispatcherConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            config,
            backend,
            credentials: Vec::new(),
            ordering: None,
            clock: None,
            metrics: None,
        }
    }

    /// Set the credential pool, in configuration order
    #[must_use]
    pub fn credentials(mut self, credentials: impl IntoIterator<Item = Credential>) -> Self {
        self.credentials = credentials.into_iter().collect();
        self
    }

    /// Set the ordering strategy
    #[must_use]
    pub fn ordering(mut self, ordering: impl KeyOrdering + 'static) -> Self {
        self.ordering = Some(Box::new(ordering));
        self
    }

    /// Set a boxed ordering strategy
    #[must_use]
    pub fn boxed_ordering(mut self, ordering: Box<dyn KeyOrdering>) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Set the clock
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Attach metrics
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the dispatcher
    #[must_use]
    pub fn build(self) -> Dispatcher {
        let clock = self.clock.unwrap_or_else(system_clock);
        let classifier = Classifier::new(self.config.health.clone(), self.config.credit_policy());
        let pool = KeyPool::new(self.credentials);

        info!(
            model = %self.config.model,
            keys = pool.len(),
            free_model = self.config.model.is_free(),
            treat_402_as_transient = self.config.treat_402_as_transient,
            "Dispatcher initialized"
        );

        Dispatcher {
            cache: ResponseCache::with_clock(self.config.cache.clone(), Arc::clone(&clock)),
            timeouts: TimeoutManager::with_request_timeout(self.config.request_timeout),
            ordering: self.ordering.unwrap_or_else(|| Box::new(RandomOrdering::new())),
            backend: self.backend,
            pool,
            classifier,
            clock,
            metrics: self.metrics,
            config: self.config,
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }
}
