//! OpenRouter backend.
//!
//! Speaks the OpenAI-compatible chat completions API exposed by OpenRouter.
//! The credential is supplied per call by the dispatcher.

use async_trait::async_trait;
use keypool_core::{
    ChatMessage, CompletionBackend, CompletionRequest, Credential, DispatchError, UpstreamFailure,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter backend configuration
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    /// API root, without the trailing `/chat/completions`
    pub base_url: String,
    /// Sent as `HTTP-Referer` for attribution
    pub referer: Option<String>,
    /// Sent as `X-Title` for attribution
    pub title: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            referer: None,
            title: None,
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl OpenRouterConfig {
    /// Create a configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set attribution headers
    #[must_use]
    pub fn with_attribution(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self.title = Some(title.into());
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenRouter backend implementation
#[derive(Debug, Clone)]
pub struct OpenRouterBackend {
    config: OpenRouterConfig,
    client: Client,
}

impl OpenRouterBackend {
    /// Create a new OpenRouter backend
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created
    pub fn new(config: OpenRouterConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| DispatchError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Get the chat completions endpoint URL
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }
}

#[async_trait]
impl CompletionBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn complete(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<String, UpstreamFailure> {
        let body = OpenRouterRequest {
            model: request.model.as_str(),
            messages: &request.messages,
            max_tokens: request.max_tokens.value(),
        };

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request to OpenRouter"
        );

        let mut req_builder = self
            .client
            .post(self.completions_url())
            .bearer_auth(credential.expose_secret())
            .header("Content-Type", "application/json");

        if let Some(ref referer) = self.config.referer {
            req_builder = req_builder.header("HTTP-Referer", referer);
        }
        if let Some(ref title) = self.config.title {
            req_builder = req_builder.header("X-Title", title);
        }

        let response = req_builder.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamFailure::timeout(self.config.timeout)
            } else {
                UpstreamFailure::transport(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %error_body, "OpenRouter API error");
            return Err(UpstreamFailure::status(status.as_u16(), error_body));
        }

        let parsed: OpenRouterResponse = response
            .json()
            .await
            .map_err(|e| UpstreamFailure::malformed(format!("Failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| UpstreamFailure::malformed("Response contained no message content"))
    }
}

#[derive(Debug, Serialize)]
struct OpenRouterRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<OpenRouterChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = OpenRouterConfig::new()
            .with_base_url("https://proxy.local/api/v1/")
            .with_attribution("https://example.org", "Alliance Bot")
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.base_url, "https://proxy.local/api/v1");
        assert_eq!(config.title.as_deref(), Some("Alliance Bot"));
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_completions_url() {
        let backend = OpenRouterBackend::new(OpenRouterConfig::default()).expect("create backend");
        assert_eq!(
            backend.completions_url(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(backend.name(), "openrouter");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"id":"gen-1","choices":[{"index":0,"message":{"role":"assistant","content":"Hi!"}}]}"#;
        let parsed: OpenRouterResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi!"));
    }
}
