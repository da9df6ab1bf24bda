//! Final reply composition.
//!
//! A successful tool payload is folded into one more model pass so the
//! user always reads natural language, never a raw tool response. A
//! failed invocation degrades to a direct answer; the failure is recorded
//! on the assistant message for observability, not shown as an error.

use std::sync::Arc;

use parley_mcp::types::{InvocationOutcome, ToolInvocation};
use parley_memory::types::ContextBlob;
use serde_json::Value;
use tracing::{debug, warn};

use crate::provider::{CompletionRequest, ModelClient, ModelError, PromptMessage};
use crate::router::RouteDecision;

const COMPOSE_SYSTEM_PROMPT: &str = "\
You are a helpful conversational assistant. A tool has already been called \
on the user's behalf; its output is provided. Answer the user's message in \
natural language using that output. Do not mention the tool mechanics.";

const FALLBACK_SYSTEM_PROMPT: &str = "\
You are a helpful conversational assistant. Answer the user's message \
directly. A tool that might have helped was unavailable, so answer from \
your own knowledge and say so if precision matters.";

/// The finished turn: reply text plus the metadata that goes on the
/// assistant's persistence record.
#[derive(Debug, Clone)]
pub struct ComposedReply {
    pub text: String,
    pub tokens: u32,
    /// Tool-call metadata for the assistant record; `None` when the turn
    /// was answered directly with no tool attempted.
    pub tool_call: Option<Value>,
}

pub struct ResponseComposer {
    model: Arc<dyn ModelClient>,
    max_tokens: u32,
}

impl ResponseComposer {
    pub fn new(model: Arc<dyn ModelClient>, max_tokens: u32) -> Self {
        Self { model, max_tokens }
    }

    /// Merge the routing decision and (optional) tool invocation into the
    /// final reply. Only `ModelError` escapes — every tool failure mode is
    /// absorbed here.
    pub async fn compose(
        &self,
        context: &ContextBlob,
        user_message: &str,
        decision: RouteDecision,
        invocation: Option<&ToolInvocation>,
    ) -> Result<ComposedReply, ModelError> {
        match (decision, invocation) {
            // Direct answer: the router already produced the text.
            (RouteDecision::DirectAnswer { text, tokens }, _) => Ok(ComposedReply {
                text,
                tokens,
                tool_call: None,
            }),

            (RouteDecision::ToolCall { .. }, Some(invocation)) => match &invocation.outcome {
                InvocationOutcome::Success { text: payload } => {
                    debug!(tool = %invocation.tool_name, "folding tool payload into final pass");
                    let completion = self
                        .model
                        .complete(&CompletionRequest {
                            system: COMPOSE_SYSTEM_PROMPT.to_string(),
                            messages: tool_result_messages(context, user_message, invocation, payload),
                            max_tokens: self.max_tokens,
                        })
                        .await?;
                    Ok(ComposedReply {
                        text: completion.text,
                        tokens: completion.tokens,
                        tool_call: Some(invocation_metadata(invocation)),
                    })
                }
                _ => {
                    warn!(
                        tool = %invocation.tool_name,
                        outcome = invocation.outcome.tag(),
                        "tool failed — composing direct answer instead"
                    );
                    let completion = self
                        .model
                        .complete(&CompletionRequest {
                            system: FALLBACK_SYSTEM_PROMPT.to_string(),
                            messages: plain_messages(context, user_message),
                            max_tokens: self.max_tokens,
                        })
                        .await?;
                    Ok(ComposedReply {
                        text: completion.text,
                        tokens: completion.tokens,
                        tool_call: Some(invocation_metadata(invocation)),
                    })
                }
            },

            // A tool decision with no invocation means dispatch was refused
            // (inactive or unregistered server). Same fallback as a failure.
            (RouteDecision::ToolCall { name, server_id, .. }, None) => {
                warn!(tool = %name, %server_id, "tool was not dispatched — composing direct answer");
                let completion = self
                    .model
                    .complete(&CompletionRequest {
                        system: FALLBACK_SYSTEM_PROMPT.to_string(),
                        messages: plain_messages(context, user_message),
                        max_tokens: self.max_tokens,
                    })
                    .await?;
                Ok(ComposedReply {
                    text: completion.text,
                    tokens: completion.tokens,
                    tool_call: Some(serde_json::json!({
                        "name": name,
                        "server_id": server_id,
                        "outcome": "not_dispatched",
                    })),
                })
            }
        }
    }
}

fn plain_messages(context: &ContextBlob, user_message: &str) -> Vec<PromptMessage> {
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

fn tool_result_messages(
    context: &ContextBlob,
    user_message: &str,
    invocation: &ToolInvocation,
    payload: &str,
) -> Vec<PromptMessage> {
    let mut messages = plain_messages(context, user_message);
    messages.push(PromptMessage::assistant(format!(
        "[tool {} returned]\n{}",
        invocation.tool_name, payload
    )));
    messages.push(PromptMessage::user(
        "Compose the final answer for the user from the tool output above.",
    ));
    messages
}

/// Metadata stored on the assistant record: what was attempted and how it
/// ended. Arguments are included so a failed turn can be replayed.
fn invocation_metadata(invocation: &ToolInvocation) -> Value {
    serde_json::json!({
        "name": invocation.tool_name,
        "server_id": invocation.server_id,
        "arguments": invocation.arguments,
        "outcome": invocation.outcome.tag(),
        "latency_ms": invocation.latency_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;

    fn invocation(outcome: InvocationOutcome) -> ToolInvocation {
        ToolInvocation {
            tool_name: "get_time".to_string(),
            arguments: serde_json::json!({ "timezone": "America/New_York" }),
            server_id: "srv-1".to_string(),
            outcome,
            latency_ms: 42,
        }
    }

    fn tool_decision() -> RouteDecision {
        RouteDecision::ToolCall {
            server_id: "srv-1".to_string(),
            name: "get_time".to_string(),
            arguments: serde_json::json!({ "timezone": "America/New_York" }),
        }
    }

    #[tokio::test]
    async fn successful_invocation_is_folded_into_a_final_pass() {
        let model = ScriptedModel::with_responses(vec!["It is 9:41 AM in New York."]);
        let composer = ResponseComposer::new(Arc::new(model), 1024);

        let inv = invocation(InvocationOutcome::Success {
            text: "2026-08-07T09:41:00-04:00".to_string(),
        });
        let reply = composer
            .compose(
                &ContextBlob::default(),
                "What time is it in New York right now?",
                tool_decision(),
                Some(&inv),
            )
            .await
            .unwrap();

        assert!(reply.text.contains("9:41"));
        let meta = reply.tool_call.unwrap();
        assert_eq!(meta["outcome"], "success");
        assert_eq!(meta["name"], "get_time");
    }

    #[tokio::test]
    async fn timed_out_invocation_degrades_to_direct_answer() {
        let model = ScriptedModel::with_responses(vec![
            "I could not check a live clock, but New York is on Eastern Time.",
        ]);
        let composer = ResponseComposer::new(Arc::new(model), 1024);

        let inv = invocation(InvocationOutcome::Timeout);
        let reply = composer
            .compose(
                &ContextBlob::default(),
                "What time is it in New York right now?",
                tool_decision(),
                Some(&inv),
            )
            .await
            .unwrap();

        // The turn completed with an answer; the failure lives in metadata.
        assert!(reply.text.contains("Eastern"));
        assert_eq!(reply.tool_call.unwrap()["outcome"], "timeout");
    }

    #[tokio::test]
    async fn direct_answer_carries_no_tool_metadata() {
        let model = ScriptedModel::with_responses(vec![]);
        let composer = ResponseComposer::new(Arc::new(model), 1024);

        let reply = composer
            .compose(
                &ContextBlob::default(),
                "What is the capital of France?",
                RouteDecision::DirectAnswer {
                    text: "Paris.".to_string(),
                    tokens: 5,
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(reply.text, "Paris.");
        assert!(reply.tool_call.is_none());
    }

    #[tokio::test]
    async fn model_outage_surfaces_as_error() {
        // Script exhausted -> Unavailable. The caller turns this into the
        // one user-visible failure mode.
        let model = ScriptedModel::with_responses(vec![]);
        let composer = ResponseComposer::new(Arc::new(model), 1024);

        let inv = invocation(InvocationOutcome::Timeout);
        let result = composer
            .compose(&ContextBlob::default(), "hi", tool_decision(), Some(&inv))
            .await;

        assert!(matches!(result, Err(ModelError::Unavailable(_))));
    }
}
