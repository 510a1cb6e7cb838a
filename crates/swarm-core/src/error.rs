use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, SwarmError>;
