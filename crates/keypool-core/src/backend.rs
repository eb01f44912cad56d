//! The seam between the dispatcher and the upstream completion endpoint.
//!
//! The dispatcher owns credential selection and health; a backend only knows
//! how to perform one call with the credential it is handed.

use crate::error::UpstreamFailure;
use crate::message::ChatMessage;
use crate::types::{Credential, MaxTokens, ModelId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One completion call as issued by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier sent upstream
    pub model: ModelId,
    /// Ordered conversation
    pub messages: Vec<ChatMessage>,
    /// Token budget for the answer
    pub max_tokens: MaxTokens,
}

impl CompletionRequest {
    /// Create a new completion request
    #[must_use]
    pub fn new(model: ModelId, messages: Vec<ChatMessage>, max_tokens: MaxTokens) -> Self {
        Self {
            model,
            messages,
            max_tokens,
        }
    }
}

/// Upstream completion endpoint
///
/// Implementations perform exactly one network call per invocation and never
/// retry on their own.
#[async_trait]
pub trait CompletionBackend: Send + Sync + 'static {
    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    /// Execute a chat completion with the given credential
    ///
    /// # Errors
    /// Returns `UpstreamFailure` for non-success statuses, transport failures
    /// and malformed bodies
    async fn complete(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<String, UpstreamFailure>;
}
