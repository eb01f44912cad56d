//! Validated domain types (newtypes) shared across the dispatcher crates.
//!
//! Values that cross a crate boundary are wrapped so that invalid token
//! budgets, empty model names and leaked credentials are caught early.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use thiserror::Error;

/// Validation error for domain types
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Max tokens value below the minimum
    #[error("Invalid max_tokens {value}: must be at least {min}")]
    InvalidMaxTokens {
        /// The invalid value provided
        value: u32,
        /// Minimum allowed value
        min: u32,
    },

    /// Model ID validation failed
    #[error("Invalid model_id: {reason}")]
    InvalidModelId {
        /// Reason for validation failure
        reason: String,
    },

    /// Credential validation failed
    #[error("Invalid credential: {reason}")]
    InvalidCredential {
        /// Reason for validation failure
        reason: String,
    },

    /// Message list validation failed
    #[error("Invalid messages: {reason}")]
    InvalidMessages {
        /// Reason for validation failure
        reason: String,
    },
}

/// Maximum tokens to generate
///
/// Only zero is rejected; the upstream enforces the per-model ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MaxTokens(NonZeroU32);

impl MaxTokens {
    /// Minimum allowed max_tokens
    pub const MIN: u32 = 1;
    /// Budget used when the caller does not pass one
    pub const DEFAULT: u32 = 1000;

    /// Create a new max_tokens value with validation
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidMaxTokens` if value is zero
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or(ValidationError::InvalidMaxTokens { value, min: Self::MIN })
    }

    /// Get the inner value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0.get()
    }
}

impl Default for MaxTokens {
    fn default() -> Self {
        Self(NonZeroU32::MIN.saturating_add(Self::DEFAULT - 1))
    }
}

impl TryFrom<u32> for MaxTokens {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MaxTokens> for u32 {
    fn from(tokens: MaxTokens) -> Self {
        tokens.value()
    }
}

impl fmt::Display for MaxTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Model identifier (non-empty, max 256 chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// Maximum length for model ID
    pub const MAX_LENGTH: usize = 256;

    /// Marker OpenRouter appends to free-tier model variants
    pub const FREE_MARKER: &'static str = ":free";

    /// Create a new model ID with validation
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidModelId` if empty or exceeds max length
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(ValidationError::InvalidModelId {
                reason: "model_id cannot be empty".to_string(),
            });
        }
        if value.len() > Self::MAX_LENGTH {
            return Err(ValidationError::InvalidModelId {
                reason: format!("model_id exceeds maximum length of {}", Self::MAX_LENGTH),
            });
        }
        Ok(Self(value))
    }

    /// Get the inner value as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a free-tier model variant
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.0.to_lowercase().contains(Self::FREE_MARKER)
    }

    /// Whether the name looks like a paid OpenAI-family model
    #[must_use]
    pub fn looks_paid(&self) -> bool {
        let lower = self.0.to_lowercase();
        (lower.contains("openai") || lower.contains("gpt-")) && !lower.contains(Self::FREE_MARKER)
    }
}

impl TryFrom<String> for ModelId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ModelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Upstream credential (sensitive, never logged)
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    /// Create a new credential
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidCredential` if the value is blank
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::InvalidCredential {
                reason: "credential cannot be empty".to_string(),
            });
        }
        Ok(Self(SecretString::new(value)))
    }

    /// Expose the secret value (use sparingly)
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Credential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}
