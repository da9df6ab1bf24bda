use parley_core::types::MemoryStrategy;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Closed,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

/// A persisted conversation.
///
/// Conversations are lazy-created on the first message and track
/// aggregate stats so a UI can show token usage without scanning the
/// full message log. The memory strategy is chosen at creation time and
/// immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// UUIDv7 primary key — time-sortable.
    pub id: String,
    pub owner_user_id: String,
    /// Optional user-provided title (e.g. "Weekend trip planning").
    pub title: Option<String>,
    pub status: ConversationStatus,
    pub memory_strategy: MemoryStrategy,
    /// Total number of messages exchanged in this conversation.
    pub message_count: u32,
    /// Cumulative token usage across all turns.
    pub total_tokens: u64,
    /// RFC3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }
}
