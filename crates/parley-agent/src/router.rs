//! Intent routing: direct model answer vs. one tool call.
//!
//! The model's structured decision is untrusted input. It is parsed into
//! a tagged union and schema-validated before the engine acts on it; any
//! parse or validation failure falls back to a direct answer built from
//! the same prompt context.

use std::sync::Arc;

use parley_mcp::types::BoundTool;
use parley_memory::types::ContextBlob;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::provider::{Completion, CompletionRequest, ModelClient, ModelError, PromptMessage};

const DECISION_SYSTEM_PROMPT: &str = "\
You are the routing stage of a conversational assistant. Decide whether the \
user's message can be answered directly or requires exactly one of the \
available tools.

Respond with a single JSON object and nothing else:
- Direct answer: {\"action\":\"answer\",\"text\":\"<your answer>\"}
- Tool call: {\"action\":\"tool\",\"name\":\"<tool name>\",\"arguments\":{...}}

Only call a tool when the message actually needs it. Arguments must match \
the tool's input schema exactly.";

const ANSWER_SYSTEM_PROMPT: &str = "\
You are a helpful conversational assistant. Answer the user's message \
directly and concisely.";

/// The routing outcome. `DirectAnswer` carries the text the model already
/// produced; `ToolCall` has passed schema validation and names an active
/// server.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    DirectAnswer { text: String, tokens: u32 },
    ToolCall {
        server_id: String,
        name: String,
        arguments: Value,
    },
}

/// What the model is asked to emit. Anything that fails to parse into
/// this union is treated as no decision at all.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ModelDecision {
    Answer {
        text: String,
    },
    Tool {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}

pub struct IntentRouter {
    model: Arc<dyn ModelClient>,
    max_tokens: u32,
}

impl IntentRouter {
    pub fn new(model: Arc<dyn ModelClient>, max_tokens: u32) -> Self {
        Self { model, max_tokens }
    }

    /// Decide how to handle one user turn.
    ///
    /// With no active tools the decision stage is skipped entirely and the
    /// turn goes straight to a direct completion. Otherwise the model is
    /// asked for a structured decision; the first valid tool selection
    /// wins, and everything else degrades to a direct answer.
    pub async fn decide(
        &self,
        context: &ContextBlob,
        user_message: &str,
        active_tools: &[BoundTool],
    ) -> Result<RouteDecision, ModelError> {
        if active_tools.is_empty() {
            let completion = self.direct_answer(context, user_message).await?;
            return Ok(RouteDecision::DirectAnswer {
                text: completion.text,
                tokens: completion.tokens,
            });
        }

        let request = CompletionRequest {
            system: decision_system_prompt(active_tools),
            messages: prompt_messages(context, user_message),
            max_tokens: self.max_tokens,
        };
        let completion = self.model.complete(&request).await?;

        match parse_decision(&completion.text) {
            Some(ModelDecision::Answer { text }) => Ok(RouteDecision::DirectAnswer {
                text,
                tokens: completion.tokens,
            }),
            Some(ModelDecision::Tool { name, arguments }) => {
                match resolve_tool_call(&name, &arguments, active_tools) {
                    Ok(server_id) => {
                        debug!(tool = %name, %server_id, "routing to tool");
                        Ok(RouteDecision::ToolCall {
                            server_id,
                            name,
                            arguments,
                        })
                    }
                    Err(reason) => {
                        warn!(tool = %name, %reason, "tool decision rejected — falling back to direct answer");
                        let completion = self.direct_answer(context, user_message).await?;
                        Ok(RouteDecision::DirectAnswer {
                            text: completion.text,
                            tokens: completion.tokens,
                        })
                    }
                }
            }
            None => {
                warn!("model decision was not valid JSON — falling back to direct answer");
                let completion = self.direct_answer(context, user_message).await?;
                Ok(RouteDecision::DirectAnswer {
                    text: completion.text,
                    tokens: completion.tokens,
                })
            }
        }
    }

    /// Plain completion over the same prompt context, no tool descriptors.
    pub async fn direct_answer(
        &self,
        context: &ContextBlob,
        user_message: &str,
    ) -> Result<Completion, ModelError> {
        let request = CompletionRequest {
            system: ANSWER_SYSTEM_PROMPT.to_string(),
            messages: prompt_messages(context, user_message),
            max_tokens: self.max_tokens,
        };
        self.model.complete(&request).await
    }
}

/// Conversation context per the active memory strategy, then the new
/// user message.
fn prompt_messages(context: &ContextBlob, user_message: &str) -> Vec<PromptMessage> {
    let mut messages = Vec::new();
    if !context.is_empty() {
        messages.push(PromptMessage::user(format!(
            "Conversation context:\n{}",
            context.render()
        )));
    }
    messages.push(PromptMessage::user(user_message));
    messages
}

/// System prompt with the tool schemas as machine-readable descriptors.
fn decision_system_prompt(active_tools: &[BoundTool]) -> String {
    let descriptors: Vec<Value> = active_tools
        .iter()
        .map(|bound| {
            serde_json::json!({
                "name": bound.tool.name,
                "server": bound.server_name,
                "description": bound.tool.description,
                "inputSchema": bound.tool.input_schema,
            })
        })
        .collect();

    format!(
        "{DECISION_SYSTEM_PROMPT}\n\nAvailable tools:\n{}",
        serde_json::to_string_pretty(&descriptors).unwrap_or_else(|_| "[]".to_string())
    )
}

/// Extract the decision object from the model output. Tolerates prose or
/// code fences around the JSON but nothing fancier.
fn parse_decision(text: &str) -> Option<ModelDecision> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Check a proposed tool call against the active set. Returns the bound
/// server id, or the reason the call must be rejected.
fn resolve_tool_call(
    name: &str,
    arguments: &Value,
    active_tools: &[BoundTool],
) -> Result<String, String> {
    // First valid selection wins; the router does not rank tools.
    let bound = active_tools
        .iter()
        .find(|b| b.tool.name == name)
        .ok_or_else(|| format!("tool '{name}' is not in the active set"))?;

    validate_arguments(&bound.tool.input_schema, arguments)?;
    Ok(bound.server_id.clone())
}

/// Light schema validation: required fields present, primitive types
/// plausible. Not a full JSON Schema implementation — just enough to
/// refuse obviously malformed calls before they hit the wire.
fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let args = arguments
        .as_object()
        .ok_or_else(|| "arguments must be an object".to_string())?;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !args.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in args {
            let Some(expected) = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str())
            else {
                continue;
            };
            let plausible = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !plausible {
                return Err(format!("field '{key}' should be {expected}"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{timezone_tool, ScriptedModel};

    fn router(model: ScriptedModel) -> IntentRouter {
        IntentRouter::new(Arc::new(model), 1024)
    }

    #[tokio::test]
    async fn timezone_query_routes_to_the_tool() {
        let model = ScriptedModel::with_responses(vec![
            r#"{"action":"tool","name":"get_time","arguments":{"timezone":"Asia/Tokyo"}}"#,
        ]);
        let tools = vec![timezone_tool("srv-1")];

        let decision = router(model)
            .decide(&ContextBlob::default(), "What time is it in Tokyo?", &tools)
            .await
            .unwrap();

        match decision {
            RouteDecision::ToolCall {
                server_id,
                name,
                arguments,
            } => {
                assert_eq!(server_id, "srv-1");
                assert_eq!(name, "get_time");
                assert_eq!(arguments["timezone"], "Asia/Tokyo");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn general_knowledge_query_answers_directly() {
        let model = ScriptedModel::with_responses(vec![
            r#"{"action":"answer","text":"The capital of France is Paris."}"#,
        ]);
        let tools = vec![timezone_tool("srv-1")];

        let decision = router(model)
            .decide(
                &ContextBlob::default(),
                "What is the capital of France?",
                &tools,
            )
            .await
            .unwrap();

        match decision {
            RouteDecision::DirectAnswer { text, .. } => assert!(text.contains("Paris")),
            other => panic!("expected direct answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_falls_back_to_direct_answer() {
        let model = ScriptedModel::with_responses(vec![
            r#"{"action":"tool","name":"send_email","arguments":{}}"#,
            "I cannot send email, but here is an answer.",
        ]);
        let tools = vec![timezone_tool("srv-1")];

        let decision = router(model)
            .decide(&ContextBlob::default(), "Email this to Bob", &tools)
            .await
            .unwrap();

        assert!(matches!(decision, RouteDecision::DirectAnswer { .. }));
    }

    #[tokio::test]
    async fn missing_required_argument_falls_back() {
        let model = ScriptedModel::with_responses(vec![
            r#"{"action":"tool","name":"get_time","arguments":{}}"#,
            "Some direct answer.",
        ]);
        let tools = vec![timezone_tool("srv-1")];

        let decision = router(model)
            .decide(&ContextBlob::default(), "What time is it?", &tools)
            .await
            .unwrap();

        assert!(matches!(decision, RouteDecision::DirectAnswer { .. }));
    }

    #[tokio::test]
    async fn wrong_argument_type_falls_back() {
        let model = ScriptedModel::with_responses(vec![
            r#"{"action":"tool","name":"get_time","arguments":{"timezone":42}}"#,
            "Some direct answer.",
        ]);
        let tools = vec![timezone_tool("srv-1")];

        let decision = router(model)
            .decide(&ContextBlob::default(), "What time is it?", &tools)
            .await
            .unwrap();

        assert!(matches!(decision, RouteDecision::DirectAnswer { .. }));
    }

    #[tokio::test]
    async fn garbage_model_output_falls_back() {
        let model = ScriptedModel::with_responses(vec![
            "I think I should probably use a tool here?",
            "Fallback answer.",
        ]);
        let tools = vec![timezone_tool("srv-1")];

        let decision = router(model)
            .decide(&ContextBlob::default(), "hm", &tools)
            .await
            .unwrap();

        match decision {
            RouteDecision::DirectAnswer { text, .. } => assert_eq!(text, "Fallback answer."),
            other => panic!("expected direct answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_active_tools_skips_the_decision_stage() {
        let model = ScriptedModel::with_responses(vec!["Just an answer."]);
        let decision = router(model)
            .decide(&ContextBlob::default(), "hello", &[])
            .await
            .unwrap();

        match decision {
            RouteDecision::DirectAnswer { text, .. } => assert_eq!(text, "Just an answer."),
            other => panic!("expected direct answer, got {other:?}"),
        }
    }

    #[test]
    fn decision_parses_through_code_fences() {
        let text = "```json\n{\"action\":\"answer\",\"text\":\"hi\"}\n```";
        assert!(matches!(
            parse_decision(text),
            Some(ModelDecision::Answer { .. })
        ));
    }
}
