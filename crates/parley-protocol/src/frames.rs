use parley_core::types::{MemoryStrategy, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server frame. The `type` discriminator selects the variant.
/// Wire: `{ "type": "send_message", "conversation_id": "...", "content": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame on every connection.
    Auth { token: String },
    /// Send a user turn. Omitting `conversation_id` starts a new
    /// conversation implicitly (created on first message).
    SendMessage {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        content: String,
    },
    /// Explicitly open a conversation before the first message.
    StartConversation {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        memory_strategy: Option<MemoryStrategy>,
    },
    /// Close a conversation. Only the owner may close it.
    EndConversation { conversation_id: String },
}

/// Server → Client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake ack after successful token validation.
    AuthOk {
        protocol: u32,
        user_id: String,
        conversation_count: usize,
    },
    /// Ack to the sender once its turn completes.
    SendMessage { success: bool, data: TurnData },
    /// Same payload, delivered to every other subscribed connection.
    MessageBroadcast { data: TurnData },
    ConversationStarted { conversation: Value },
    ConversationEnded { conversation_id: String },
    Error { error: String },
}

impl ServerFrame {
    pub fn ack(data: TurnData) -> Self {
        Self::SendMessage {
            success: true,
            data,
        }
    }

    pub fn broadcast(data: TurnData) -> Self {
        Self::MessageBroadcast { data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Serialize for the wire. Frame construction never produces
    /// unserializable values, so failures collapse to an error frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","error":"serialization failed"}"#.to_string())
    }
}

/// The completed-turn payload carried by both the ack and the broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnData {
    pub conversation_id: String,
    pub user_message: MessagePayload,
    pub ai_response: MessagePayload,
}

/// One persisted message as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
    /// Tool-call metadata (name, server, outcome tag). Absent when the
    /// turn was answered directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<Value>,
    pub created_at: String,
}

/// Raw inbound frame — parse the `type` discriminator first so malformed
/// frames can be rejected without losing the connection state.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl InboundFrame {
    /// Try to interpret this frame as a typed client frame.
    pub fn parse(&self) -> Option<ClientFrame> {
        let mut map = self.rest.clone();
        map.insert(
            "type".to_string(),
            Value::String(self.frame_type.clone()),
        );
        serde_json::from_value(Value::Object(map)).ok()
    }
}
