pub mod dispatch;
pub mod error;
pub mod filters;
pub mod openai;
pub mod outbound;
pub mod prompts;
pub mod provider;
pub mod summarize;
pub mod turn;

pub use dispatch::ToolDispatch;
pub use error::{EngineError, Result};
pub use filters::FilterRegistry;
pub use openai::OpenAiProvider;
pub use provider::{AssistantReply, ChatRequest, ModelProvider, ProviderError, ToolCall};
pub use turn::{ExecutionEngine, RunOutcome, TurnContext};
