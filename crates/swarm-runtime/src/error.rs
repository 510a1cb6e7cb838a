use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Engine error: {0}")]
    Engine(#[from] swarm_engine::EngineError),

    #[error("Storage error: {0}")]
    Store(#[from] swarm_store::StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] swarm_registry::RegistryError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cannot remove agent still in call-stack: {key}")]
    AgentInCallStack { key: String },

    #[error("Agent not found: {key}")]
    AgentNotFound { key: String },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
