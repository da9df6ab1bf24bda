use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A registered external tool server.
///
/// The discovered tool list is cached separately (see `ToolRegistry`) —
/// this row only carries registration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServer {
    /// UUIDv7 primary key — time-sortable.
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub active: bool,
    pub owner_user_id: String,
    /// RFC3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
}

/// One tool exposed by a server, as returned by `tools/list`.
/// Never persisted beyond the discovery cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// A `ToolDefinition` bound to the server it came from. Duplicate tool
/// names across servers stay distinguishable through `server_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundTool {
    pub server_id: String,
    pub server_name: String,
    pub tool: ToolDefinition,
}

/// How a single `tools/call` ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Success { text: String },
    Timeout,
    Transport { message: String },
    Application { code: i64, message: String },
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Success { .. })
    }

    /// Short tag for logs and message metadata.
    pub fn tag(&self) -> &'static str {
        match self {
            InvocationOutcome::Success { .. } => "success",
            InvocationOutcome::Timeout => "timeout",
            InvocationOutcome::Transport { .. } => "transport_error",
            InvocationOutcome::Application { .. } => "application_error",
        }
    }
}

/// Record of one attempted tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    pub server_id: String,
    #[serde(flatten)]
    pub outcome: InvocationOutcome,
    pub latency_ms: u64,
}

/// Wire-level access to a tool server. A trait so the turn pipeline can be
/// driven in tests without sockets.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Fetch the server's tool list (`tools/list`).
    async fn discover(&self, server: &ToolServer) -> Result<Vec<ToolDefinition>>;

    /// Execute one `tools/call`. Failure modes are folded into the
    /// invocation's outcome — this never errors at the Rust level.
    async fn invoke(
        &self,
        server: &ToolServer,
        tool_name: &str,
        arguments: Value,
        bearer_token: &str,
    ) -> ToolInvocation;
}
