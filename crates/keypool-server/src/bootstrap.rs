//! Wiring from `KeypoolConfig` to running components.

use crate::{error::ServerError, state::AppState};
use keypool_config::KeypoolConfig;
use keypool_core::{CompletionBackend, ModelId};
use keypool_dispatch::{create_ordering, Dispatcher, DispatcherConfig};
use keypool_providers::{OpenRouterBackend, OpenRouterConfig};
use keypool_resilience::{BackoffPolicy, CacheConfig, HealthPolicy};
use keypool_telemetry::{LogFormat, LoggingConfig, Metrics, MetricsConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Dispatcher settings for `model`
#[must_use]
pub fn dispatcher_config(config: &KeypoolConfig, model: ModelId) -> DispatcherConfig {
    let retry = &config.retry;
    let health = &config.health;

    DispatcherConfig::new(model)
        .with_backoff(BackoffPolicy::new(retry.max_retries, retry.base_delay, retry.max_delay))
        .with_health(
            HealthPolicy::new()
                .with_failure_threshold(health.failure_threshold)
                .with_failure_cooldown(health.failure_cooldown)
                .with_rate_limit_window(health.rate_limit_window)
                .with_credit_exhausted_cooldown(health.credit_exhausted_cooldown),
        )
        .with_402_as_transient(config.upstream.treat_402_as_transient)
        .with_cache(CacheConfig {
            enabled: config.cache.enabled,
            max_entries: config.cache.max_entries,
            default_ttl: config.cache.ttl,
        })
        .with_request_timeout(config.upstream.request_timeout)
}

/// HTTP backend settings
#[must_use]
pub fn openrouter_config(config: &KeypoolConfig) -> OpenRouterConfig {
    let upstream = &config.upstream;
    let mut backend = OpenRouterConfig::new()
        .with_base_url(upstream.base_url.as_str())
        .with_timeout(upstream.request_timeout);
    backend.connect_timeout = upstream.connect_timeout;
    backend.referer.clone_from(&upstream.referer);
    backend.title.clone_from(&upstream.title);
    backend
}

/// Logging settings
///
/// # Errors
/// Returns error if the configured format is unknown
pub fn logging_config(config: &KeypoolConfig) -> Result<LoggingConfig, ServerError> {
    let logging = &config.observability.logging;
    let format: LogFormat = logging.format.parse()?;

    let mut out = LoggingConfig::new()
        .with_level(logging.level.as_str())
        .with_format(format);
    out.include_location = logging.include_location;
    if let Some(filter) = &logging.filter {
        out = out.with_filter(filter.as_str());
    }
    Ok(out)
}

/// Metrics settings
#[must_use]
pub fn metrics_config(config: &KeypoolConfig) -> MetricsConfig {
    MetricsConfig {
        enabled: config.observability.metrics.enabled,
        path: config.observability.metrics.path.clone(),
        ..MetricsConfig::default()
    }
}

/// Build application state with the OpenRouter backend
///
/// # Errors
/// Returns error if the model cannot be resolved or a component fails to build
pub fn build_state(config: &KeypoolConfig) -> Result<AppState, ServerError> {
    let backend = OpenRouterBackend::new(openrouter_config(config))
        .map_err(|e| ServerError::Startup(e.to_string()))?;
    build_state_with_backend(config, Arc::new(backend))
}

/// Build application state around any backend
///
/// # Errors
/// Returns error if the model cannot be resolved or a component fails to build
pub fn build_state_with_backend(
    config: &KeypoolConfig,
    backend: Arc<dyn CompletionBackend>,
) -> Result<AppState, ServerError> {
    let model = config.upstream.resolve_model()?;

    let ordering = create_ordering(&config.upstream.ordering).ok_or_else(|| {
        ServerError::Startup(format!("Unknown key ordering: {}", config.upstream.ordering))
    })?;

    let metrics_config = metrics_config(config);
    let metrics = if metrics_config.enabled {
        let metrics = Metrics::new(&metrics_config)
            .map_err(|e| ServerError::Startup(format!("Failed to register metrics: {e}")))?;
        Some(Arc::new(metrics))
    } else {
        None
    };

    let mut builder = Dispatcher::builder(dispatcher_config(config, model), backend)
        .credentials(config.upstream.api_keys.iter().cloned())
        .boxed_ordering(ordering);
    if let Some(metrics) = &metrics {
        builder = builder.metrics(Arc::clone(metrics));
    }
    let dispatcher = Arc::new(builder.build());

    if dispatcher.pool_size() == 0 {
        warn!("No API keys configured, requests will receive a placeholder response");
    } else {
        info!(keys = dispatcher.pool_size(), "API keys loaded");
    }

    let mut state = AppState::new(dispatcher);
    if let Some(metrics) = metrics {
        state = state
            .with_metrics(metrics)
            .with_metrics_path(metrics_config.path);
    }
    Ok(state)
}
