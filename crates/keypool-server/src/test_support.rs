//! Stub backend for handler and server tests.

use crate::state::AppState;
use async_trait::async_trait;
use keypool_core::{
    CompletionBackend, CompletionRequest, Credential, ModelId, UpstreamFailure,
};
use keypool_dispatch::{Dispatcher, DispatcherConfig};
use keypool_resilience::BackoffPolicy;
use std::sync::Arc;

/// Replies with the credential it was called with
#[derive(Debug, Default)]
pub struct EchoBackend;

#[async_trait]
impl CompletionBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<String, UpstreamFailure> {
        if credential.expose_secret().starts_with("bad") {
            return Err(UpstreamFailure::status(500, "upstream exploded"));
        }
        Ok(format!(
            "{} via {}",
            request.messages.last().map_or("", |m| m.content.as_str()),
            credential.expose_secret()
        ))
    }
}

pub fn app_state(keys: Vec<&str>) -> AppState {
    let config = DispatcherConfig::new(ModelId::new("mistral/mistral-7b:free").unwrap())
        .with_backoff(BackoffPolicy::immediate(2));
    let dispatcher = Dispatcher::builder(config, Arc::new(EchoBackend))
        .credentials(keys.into_iter().map(|k| Credential::new(k).unwrap()))
        .build();
    AppState::new(Arc::new(dispatcher))
}
