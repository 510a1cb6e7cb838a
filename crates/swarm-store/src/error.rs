use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conversation not found: {key}")]
    NotFound { key: String },

    #[error("Agent not found: {key}")]
    AgentNotFound { key: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<swarm_core::SwarmError> for StoreError {
    fn from(e: swarm_core::SwarmError) -> Self {
        StoreError::InvalidValue(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
