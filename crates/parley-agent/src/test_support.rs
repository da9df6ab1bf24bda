//! Shared test doubles for router and composer tests.

use std::sync::Mutex;

use async_trait::async_trait;
use parley_mcp::types::{BoundTool, ToolDefinition};

use crate::provider::{Completion, CompletionRequest, ModelClient, ModelError};

/// Model that replays a fixed queue of responses and records the requests
/// it saw.
pub struct ScriptedModel {
    responses: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn with_responses(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<Completion, ModelError> {
        self.requests.lock().unwrap().push(req.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(ModelError::Unavailable("script exhausted".to_string()));
        }
        Ok(Completion {
            text: responses.remove(0),
            tokens: 10,
        })
    }
}

/// A timezone tool bound to the given server, matching the shape MCP
/// servers return from tools/list.
pub fn timezone_tool(server_id: &str) -> BoundTool {
    BoundTool {
        server_id: server_id.to_string(),
        server_name: "clock".to_string(),
        tool: ToolDefinition {
            name: "get_time".to_string(),
            description: "Current time for an IANA timezone".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "timezone": { "type": "string", "description": "IANA timezone id" }
                },
                "required": ["timezone"],
            }),
        },
    }
}
