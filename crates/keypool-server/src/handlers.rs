//! HTTP request handlers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use keypool_core::ChatMessage;
use keypool_dispatch::DispatcherStats;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{error::ApiError, state::AppState};

/// Token budget used when the request omits `max_tokens`
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Current UTC time (RFC 3339)
    pub time: String,
    /// Version
    pub version: String,
    /// Credentials in the pool
    pub keys_configured: usize,
    /// Credentials usable right now
    pub healthy_keys: usize,
    /// Seconds since startup
    pub uptime_seconds: i64,
}

/// Completion request body
#[derive(Debug, Deserialize)]
pub struct CompletionBody {
    /// Conversation to complete
    pub messages: Vec<ChatMessage>,
    /// Token budget
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Completion response body
#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionReply {
    /// Generated text
    pub content: String,
}

/// Liveness check
pub async fn root() -> &'static str {
    "OK"
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok".to_string(),
        time: now.to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        keys_configured: state.dispatcher.pool_size(),
        healthy_keys: state.dispatcher.healthy_key_count(),
        uptime_seconds: (now - state.started_at).num_seconds(),
    })
}

/// Dispatcher statistics
pub async fn stats(State(state): State<AppState>) -> Json<DispatcherStats> {
    Json(state.dispatcher.stats())
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let metrics = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Metrics are disabled"))?;

    state.dispatcher.publish_key_health();
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.gather(),
    ))
}

/// Completion endpoint
#[instrument(skip_all)]
pub async fn complete(
    State(state): State<AppState>,
    body: Result<Json<CompletionBody>, JsonRejection>,
) -> Result<Json<CompletionReply>, ApiError> {
    let Json(body) = body?;
    let max_tokens = body.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

    debug!(
        messages = body.messages.len(),
        max_tokens,
        "Processing completion request"
    );

    let content = state.dispatcher.make_request(body.messages, max_tokens).await?;
    Ok(Json(CompletionReply { content }))
}
