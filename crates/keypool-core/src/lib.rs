//! # Keypool Core
//!
//! Shared vocabulary for the credential-pool dispatcher:
//! - Validated domain types (model ids, token budgets, credentials)
//! - Chat messages
//! - The `CompletionBackend` seam to the upstream endpoint
//! - Error types
//! - Injectable clock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod clock;
pub mod error;
pub mod message;
pub mod types;

pub use backend::{CompletionBackend, CompletionRequest};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use error::{ApiError, ApiErrorResponse, DispatchError, DispatchResult, FailureKind, UpstreamFailure};
pub use message::{validate_messages, ChatMessage, MessageRole};
pub use types::{Credential, MaxTokens, ModelId, ValidationError};
