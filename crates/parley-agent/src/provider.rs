use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in a model prompt. Separate from the persisted
/// message type — prompts carry a `system` role that is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request to the model collaborator.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
}

/// Response from the model collaborator.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Total tokens the provider billed for this call.
    pub tokens: u32,
}

/// Model collaborator contract. Implementations talk to an upstream
/// provider; tests use a scripted stand-in.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    async fn complete(&self, req: &CompletionRequest) -> Result<Completion, ModelError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Model unavailable: {0}")]
    Unavailable(String),
}
