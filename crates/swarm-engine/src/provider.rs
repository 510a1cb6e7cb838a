use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request to a model provider. `messages` is the already-flattened
/// conversation in wire form, tool messages included and provider
/// extras preserved.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    /// `{type: function, function: {name, description, parameters}}`
    /// projections of the role's allowed tools.
    pub tools: Vec<serde_json::Value>,
    /// Passthrough tool-choice payload.
    pub tool_choice: serde_json::Value,
    pub reasoning_effort: Option<String>,
}

/// A tool call extracted from the assistant response. `arguments` stays
/// the provider's raw JSON string because the dedup scan hashes it
/// verbatim before any parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// The assistant message of one model call.
#[derive(Debug, Clone)]
pub struct AssistantReply {
    /// The provider's message object verbatim, replayed on later turns.
    pub raw: serde_json::Value,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Common interface over model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send one chat request and wait for the full assistant message.
    async fn complete(&self, req: &ChatRequest) -> Result<AssistantReply, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}
