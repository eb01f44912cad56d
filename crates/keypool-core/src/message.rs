//! Chat messages as sent to the completion endpoint.

use crate::types::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions
    System,
    /// End-user input
    User,
    /// Model output
    Assistant,
    /// Tool result
    Tool,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            _ => Err(format!("Unknown message role: {s}")),
        }
    }
}

/// A single role/content pair of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role
    pub role: MessageRole,
    /// Plain text content
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an explicit role
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Check that a conversation can be dispatched
///
/// # Errors
/// Returns `ValidationError::InvalidMessages` for an empty conversation
pub fn validate_messages(messages: &[ChatMessage]) -> Result<(), ValidationError> {
    if messages.is_empty() {
        return Err(ValidationError::InvalidMessages {
            reason: "at least one message is required".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_names() {
        assert_eq!(MessageRole::System.to_string(), "system");
        assert_eq!("ASSISTANT".parse::<MessageRole>().unwrap(), MessageRole::Assistant);
        assert!("narrator".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_validate_messages() {
        assert!(validate_messages(&[]).is_err());
        assert!(validate_messages(&[ChatMessage::system("be nice")]).is_ok());
    }
}
