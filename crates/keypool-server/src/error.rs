//! API error handling.
//!
//! Error bodies follow the OpenAI error format.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keypool_core::{ApiErrorResponse, DispatchError};
use tracing::{error, warn};

/// API error wrapper
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code
    pub status: StatusCode,
    /// Response body
    pub body: ApiErrorResponse,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: StatusCode, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorResponse {
                error: keypool_core::ApiError {
                    error_type: error_type.into(),
                    message: message.into(),
                    code: None,
                    param: None,
                },
            },
        }
    }

    /// Bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    /// Not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found_error", message)
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "server_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.body, "API error response");
        } else {
            warn!(status = %self.status, message = %self.body, "API error response");
        }

        (self.status, Json(self.body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self {
            status: err.status_code(),
            body: ApiErrorResponse::from(&err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("JSON parse error: {}", rejection.body_text()))
    }
}

/// Server startup and runtime errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),
    /// Server error during operation
    #[error("Server error: {0}")]
    Serve(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] keypool_config::ConfigError),
    /// Component could not be built
    #[error("Startup error: {0}")]
    Startup(String),
    /// Logging could not be initialized
    #[error(transparent)]
    Logging(#[from] keypool_telemetry::LoggingError),
}
