use thiserror::Error;

/// Errors that can occur during conversation operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// The requested conversation does not exist in the database.
    #[error("conversation not found: {id}")]
    NotFound { id: String },

    /// The conversation has been closed and accepts no further turns.
    #[error("conversation is closed: {id}")]
    Closed { id: String },

    /// Only the owner (or an admin) may close or delete a conversation.
    #[error("user {user_id} does not own conversation {id}")]
    NotOwner { id: String, user_id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ConversationError>;
