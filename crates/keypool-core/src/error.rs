//! Error types for the dispatcher.
//!
//! `DispatchError` is what callers of the dispatcher see. `UpstreamFailure`
//! describes a single failed attempt against one credential and never leaves
//! the dispatch loop unless the whole pool is exhausted.

use crate::types::ValidationError;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using `DispatchError`
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors surfaced by the dispatcher
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Error message
        message: String,
        /// Field that failed validation (if applicable)
        field: Option<String>,
        /// Error code for programmatic handling
        code: String,
    },

    /// Every attempt failed or no healthy key remained
    #[error("All API requests failed after {attempts} attempts ({pool_size} keys configured)")]
    PoolExhausted {
        /// Outer attempts that were started
        attempts: u32,
        /// Number of credentials in the pool
        pool_size: usize,
        /// Last upstream failure observed, if any call was made
        last_failure: Option<String>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl DispatchError {
    /// Get the HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if the caller may retry this error later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Get the error type string for API responses
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid_request_error",
            Self::PoolExhausted { .. } => "service_unavailable_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Get the error code for programmatic handling
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Validation { code, .. } => code,
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Create a validation error
    #[must_use]
    pub fn validation(message: impl Into<String>, field: Option<String>, code: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create a pool exhausted error
    #[must_use]
    pub fn pool_exhausted(attempts: u32, pool_size: usize, last_failure: Option<String>) -> Self {
        Self::PoolExhausted {
            attempts,
            pool_size,
            last_failure,
        }
    }

    /// Create an internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        let (field, code) = match &err {
            ValidationError::InvalidMaxTokens { .. } => (Some("max_tokens".to_string()), "invalid_max_tokens"),
            ValidationError::InvalidModelId { .. } => (Some("model".to_string()), "invalid_model_id"),
            ValidationError::InvalidCredential { .. } => (None, "invalid_credential"),
            ValidationError::InvalidMessages { .. } => (Some("messages".to_string()), "invalid_messages"),
        };
        Self::Validation {
            message: err.to_string(),
            field,
            code: code.to_string(),
        }
    }
}

/// Why a single upstream attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream answered with a non-success status
    Status,
    /// Connection, TLS or body transfer failed
    Transport,
    /// The per-call timeout elapsed
    Timeout,
    /// A 200 response did not carry the expected shape
    MalformedResponse,
}

/// A failed attempt against one credential
#[derive(Debug, Clone, Error)]
#[error("{}", self.describe())]
pub struct UpstreamFailure {
    /// Failure category
    pub kind: FailureKind,
    /// HTTP status, when the upstream answered
    pub status: Option<u16>,
    /// Error body or transport message
    pub message: String,
}

impl UpstreamFailure {
    /// Status code upstream uses to signal exhausted credits
    pub const PAYMENT_REQUIRED: u16 = 402;
    /// Status code upstream uses to signal throttling
    pub const TOO_MANY_REQUESTS: u16 = 429;

    /// Non-success HTTP response
    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Status,
            status: Some(status),
            message: body.into(),
        }
    }

    /// Connection-level failure
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            status: None,
            message: message.into(),
        }
    }

    /// Per-call timeout
    #[must_use]
    pub fn timeout(duration: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            status: None,
            message: format!("Request timeout after {duration:?}"),
        }
    }

    /// Unparseable success body
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::MalformedResponse,
            status: None,
            message: message.into(),
        }
    }

    /// Whether upstream reported exhausted credits
    #[must_use]
    pub fn is_credit_exhausted(&self) -> bool {
        self.status == Some(Self::PAYMENT_REQUIRED)
    }

    /// Whether upstream reported throttling by status code
    #[must_use]
    pub fn is_too_many_requests(&self) -> bool {
        self.status == Some(Self::TOO_MANY_REQUESTS)
    }

    fn describe(&self) -> String {
        match self.status {
            Some(status) => format!("API request failed with status {status}: {}", self.message),
            None => self.message.clone(),
        }
    }
}

/// API error response format (OpenAI compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details
    pub error: ApiError,
}

/// API error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message
    pub message: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Parameter that caused the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl From<&DispatchError> for ApiErrorResponse {
    fn from(err: &DispatchError) -> Self {
        let param = match err {
            DispatchError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        Self {
            error: ApiError {
                error_type: err.error_type().to_string(),
                message: err.to_string(),
                code: Some(err.error_code().to_string()),
                param,
            },
        }
    }
}

impl fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error.message)
    }
}
