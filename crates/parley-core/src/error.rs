use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Session protocol error: {0}")]
    Protocol(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Deadline exceeded after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Model provider unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short error code string sent to clients in WS error frames.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "CONFIG_ERROR",
            EngineError::Auth(_) => "AUTH_FAILED",
            EngineError::Protocol(_) => "PROTOCOL_ERROR",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Transport(_) => "TRANSPORT_ERROR",
            EngineError::Timeout { .. } => "TIMEOUT",
            EngineError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            EngineError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
