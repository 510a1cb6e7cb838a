use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Model provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Store(#[from] swarm_store::StoreError),

    #[error("Missing initial turn for {key}; seed the conversation before running")]
    MissingInitialTurn { key: String },

    #[error("Turn-zero already exists for {key}")]
    TurnZeroExists { key: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
