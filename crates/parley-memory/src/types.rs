use async_trait::async_trait;
use parley_core::types::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One persisted message. Immutable once stored; ordered by
/// `(created_at, id)` so same-timestamp ties break by insertion sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub tokens: Option<u32>,
    /// Tool-call metadata (name, server id, outcome tag) when a tool was
    /// attempted during this turn.
    pub tool_call: Option<Value>,
    pub created_at: String,
}

/// Input for appending a message — ids and timestamps are assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub tokens: Option<u32>,
    pub tool_call: Option<Value>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tokens: None,
            tool_call: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tokens: Option<u32>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tokens,
            tool_call: None,
        }
    }
}

/// What the Memory Manager hands the router: an optional running summary
/// plus the raw turns the active strategy allows.
#[derive(Debug, Clone, Default)]
pub struct ContextBlob {
    pub summary: Option<String>,
    pub messages: Vec<StoredMessage>,
}

impl ContextBlob {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.messages.is_empty()
    }

    /// Render for prompt injection: summary block first, then raw turns
    /// as `role: content` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(ref summary) = self.summary {
            out.push_str("Conversation so far (summarized):\n");
            out.push_str(summary);
            out.push_str("\n\n");
        }
        for msg in &self.messages {
            out.push_str(&format!("{}: {}\n", msg.role, msg.content));
        }
        out
    }
}

/// Folds evicted turns into a running summary. A trait so the memory
/// crate stays independent of any model provider; the gateway wires a
/// model-backed implementation.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        previous_summary: Option<&str>,
        evicted: &[StoredMessage],
    ) -> Result<String>;
}
