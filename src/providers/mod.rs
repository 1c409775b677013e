mod open_ai;
mod prompt;

pub use open_ai::OpenAIModel;
pub use prompt::{
    build_correction_prompt, build_user_prompt, recipe_schema, RECIPE_EXTRACTION_PROMPT,
    RECIPE_SCHEMA_NAME,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("model returned no content: {0}")]
    EmptyResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A conversation plus the JSON schema the answer must follow.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub schema_name: &'static str,
    pub schema: Value,
}

/// A model that answers with JSON constrained by a schema.
///
/// Implementations return the raw JSON text; checking it against the target
/// type is the caller's job.
#[async_trait]
pub trait StructuredModel: Send + Sync {
    /// Provider name (e.g., "openai").
    fn provider_name(&self) -> &str;

    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}
