//! JSON-RPC 2.0 client for MCP tool servers over HTTP.
//!
//! One POST per request, bearer-token authenticated with the calling
//! user's token — never a server-wide credential. No automatic retries;
//! every failure mode collapses into the invocation outcome and the turn
//! degrades to a direct answer upstream.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{McpError, Result};
use crate::types::{
    InvocationOutcome, ToolDefinition, ToolInvocation, ToolInvoker, ToolServer,
};

pub struct HttpToolClient {
    client: reqwest::Client,
    call_timeout: Duration,
    discovery_timeout: Duration,
    request_id: AtomicI64,
}

impl HttpToolClient {
    pub fn new(call_timeout: Duration, discovery_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            call_timeout,
            discovery_timeout,
            request_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> i64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// POST one JSON-RPC request and return the parsed response body.
    async fn post_rpc(
        &self,
        server: &ToolServer,
        bearer_token: Option<&str>,
        body: &Value,
    ) -> std::result::Result<Value, String> {
        let mut request = self
            .client
            .post(&server.base_url)
            .header("content-type", "application/json")
            .json(body);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| format!("invalid response body: {e}"))
    }
}

#[async_trait]
impl ToolInvoker for HttpToolClient {
    async fn discover(&self, server: &ToolServer) -> Result<Vec<ToolDefinition>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id(),
            "method": "tools/list",
            "params": {},
        });

        debug!(server = %server.name, url = %server.base_url, "tools/list");

        let response = tokio::time::timeout(
            self.discovery_timeout,
            self.post_rpc(server, None, &body),
        )
        .await
        .map_err(|_| McpError::Discovery {
            server: server.id.clone(),
            reason: format!("timed out after {:?}", self.discovery_timeout),
        })?
        .map_err(|reason| McpError::Discovery {
            server: server.id.clone(),
            reason,
        })?;

        if let Some(err) = response.get("error") {
            return Err(McpError::Discovery {
                server: server.id.clone(),
                reason: err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        let tools = response
            .get("result")
            .and_then(|r| r.get("tools"))
            .and_then(|t| t.as_array())
            .ok_or_else(|| McpError::Discovery {
                server: server.id.clone(),
                reason: "response missing result.tools".to_string(),
            })?;

        Ok(tools
            .iter()
            .filter_map(|t| serde_json::from_value(t.clone()).ok())
            .collect())
    }

    async fn invoke(
        &self,
        server: &ToolServer,
        tool_name: &str,
        arguments: Value,
        bearer_token: &str,
    ) -> ToolInvocation {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id(),
            "method": "tools/call",
            "params": { "name": tool_name, "arguments": arguments },
        });

        debug!(server = %server.name, tool = tool_name, "tools/call");

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.call_timeout,
            self.post_rpc(server, Some(bearer_token), &body),
        )
        .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Err(_) => {
                warn!(
                    server = %server.name,
                    tool = tool_name,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "tool call deadline exceeded"
                );
                InvocationOutcome::Timeout
            }
            Ok(Err(message)) => {
                warn!(server = %server.name, tool = tool_name, %message, "tool call transport failure");
                InvocationOutcome::Transport { message }
            }
            Ok(Ok(response)) => parse_call_response(&response),
        };

        ToolInvocation {
            tool_name: tool_name.to_string(),
            arguments,
            server_id: server.id.clone(),
            outcome,
            latency_ms,
        }
    }
}

/// Map a JSON-RPC response body to an invocation outcome.
///
/// `{error: {code, message}}` → application error (e.g. -32602 for an
/// unknown timezone identifier); otherwise the `content` text blocks are
/// concatenated into the success payload.
fn parse_call_response(response: &Value) -> InvocationOutcome {
    if let Some(err) = response.get("error") {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return InvocationOutcome::Application { code, message };
    }

    let text: String = response
        .get("result")
        .and_then(|r| r.get("content"))
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if text.is_empty() && response.get("result").is_none() {
        return InvocationOutcome::Transport {
            message: "response missing result".to_string(),
        };
    }

    InvocationOutcome::Success { text }
}
