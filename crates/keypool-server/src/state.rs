//! Application state shared across handlers.

use chrono::{DateTime, Utc};
use keypool_dispatch::Dispatcher;
use keypool_telemetry::Metrics;
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// The dispatcher serving completions
    pub dispatcher: Arc<Dispatcher>,
    /// Metrics collector, absent when metrics are disabled
    pub metrics: Option<Arc<Metrics>>,
    /// Route serving the metrics exposition
    pub metrics_path: String,
    /// Process start time
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create application state around a dispatcher
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            metrics: None,
            metrics_path: "/metrics".to_string(),
            started_at: Utc::now(),
        }
    }

    /// Attach a metrics collector
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Serve metrics under a different path
    #[must_use]
    pub fn with_metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = path.into();
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("dispatcher", &self.dispatcher)
            .field("metrics", &self.metrics.is_some())
            .field("metrics_path", &self.metrics_path)
            .field("started_at", &self.started_at)
            .finish()
    }
}
