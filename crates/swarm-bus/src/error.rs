use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Publish ack timeout on subject '{subject}' after {secs}s")]
    PublishTimeout { subject: String, secs: f64 },

    #[error("No response on inbox '{inbox}' within {secs}s")]
    ResponseTimeout { inbox: String, secs: f64 },

    #[error("Subject closed: {0}")]
    SubjectClosed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BusError {
    /// Short error code string carried on wire envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            BusError::PublishTimeout { .. } => "PUBLISH_TIMEOUT",
            BusError::ResponseTimeout { .. } => "RESPONSE_TIMEOUT",
            BusError::SubjectClosed(_) => "SUBJECT_CLOSED",
            BusError::Serialization(_) => "SERIALIZATION_ERROR",
            BusError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the caller may retry the publish.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::PublishTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
