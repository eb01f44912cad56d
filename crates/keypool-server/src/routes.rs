//! Route table.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{handlers, state::AppState};

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let metrics_path = state.metrics_path.clone();
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::stats))
        .route(&metrics_path, get(handlers::metrics_endpoint))
        .route("/v1/complete", post(handlers::complete))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
