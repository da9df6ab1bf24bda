use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("tool server not found: {id}")]
    ServerNotFound { id: String },

    #[error("tool server is inactive: {id}")]
    ServerInactive { id: String },

    #[error("discovery failed for {server}: {reason}")]
    Discovery { server: String, reason: String },
}

pub type Result<T> = std::result::Result<T, McpError>;
