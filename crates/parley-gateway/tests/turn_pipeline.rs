// End-to-end turn pipeline tests: scripted model + mock tool invoker,
// no sockets. Exercises routing, invocation, composition, persistence,
// and fan-out exactly as the WS handlers drive them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_agent::provider::{Completion, CompletionRequest, ModelClient, ModelError};
use parley_agent::{IntentRouter, ResponseComposer};
use parley_conversations::ConversationManager;
use parley_core::config::ParleyConfig;
use parley_core::types::MemoryStrategy;
use parley_gateway::app::AppState;
use parley_gateway::auth::StaticTokenValidator;
use parley_gateway::turn::{enqueue_turn, TurnJob};
use parley_mcp::types::{
    InvocationOutcome, ToolDefinition, ToolInvocation, ToolInvoker, ToolServer,
};
use parley_mcp::ToolRegistry;
use parley_memory::{MemoryManager, SqliteMessageStore, StoredMessage, Summarizer};
use serde_json::Value;
use tokio::sync::mpsc;

struct ScriptedModel {
    responses: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _req: &CompletionRequest) -> Result<Completion, ModelError> {
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

struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(
        &self,
        _previous_summary: Option<&str>,
        _evicted: &[StoredMessage],
    ) -> parley_memory::Result<String> {
        Ok(String::new())
    }
}

/// Invoker that discovers a timezone tool and replays a fixed outcome
/// per call, recording the bearer tokens it was handed.
struct MockInvoker {
    outcomes: Mutex<Vec<InvocationOutcome>>,
    seen_tokens: Mutex<Vec<String>>,
}

impl MockInvoker {
    fn new(outcomes: Vec<InvocationOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            seen_tokens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ToolInvoker for MockInvoker {
    async fn discover(&self, _server: &ToolServer) -> parley_mcp::Result<Vec<ToolDefinition>> {
        Ok(vec![ToolDefinition {
            name: "get_time".to_string(),
            description: "Current time for an IANA timezone".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "timezone": { "type": "string" } },
                "required": ["timezone"],
            }),
        }])
    }

    async fn invoke(
        &self,
        server: &ToolServer,
        tool_name: &str,
        arguments: Value,
        bearer_token: &str,
    ) -> ToolInvocation {
        self.seen_tokens
            .lock()
            .unwrap()
            .push(bearer_token.to_string());
        let outcome = {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                InvocationOutcome::Transport {
                    message: "mock exhausted".to_string(),
                }
            } else {
                outcomes.remove(0)
            }
        };
        ToolInvocation {
            tool_name: tool_name.to_string(),
            arguments,
            server_id: server.id.clone(),
            outcome,
            latency_ms: 5,
        }
    }
}

fn build_app(model: ScriptedModel, invoker: Arc<MockInvoker>) -> Arc<AppState> {
    let model: Arc<dyn ModelClient> = Arc::new(model);

    let conv_conn = rusqlite::Connection::open_in_memory().unwrap();
    parley_conversations::db::init_db(&conv_conn).unwrap();
    let msg_conn = rusqlite::Connection::open_in_memory().unwrap();
    parley_memory::db::init_db(&msg_conn).unwrap();
    let mcp_conn = rusqlite::Connection::open_in_memory().unwrap();
    parley_mcp::db::init_db(&mcp_conn).unwrap();

    let registry = ToolRegistry::new(mcp_conn, invoker.clone() as Arc<dyn ToolInvoker>, 300);
    let memory = MemoryManager::new(
        Arc::new(SqliteMessageStore::new(msg_conn)),
        Arc::new(NoopSummarizer),
        8,
    );

    Arc::new(AppState::new(
        ParleyConfig::default(),
        Arc::new(StaticTokenValidator::new(Default::default())),
        registry,
        invoker as Arc<dyn ToolInvoker>,
        memory,
        ConversationManager::new(conv_conn),
        IntentRouter::new(Arc::clone(&model), 1024),
        ResponseComposer::new(model, 1024),
    ))
}

fn job(
    conversation: parley_conversations::Conversation,
    content: &str,
    conn_id: &str,
    reply_tx: mpsc::Sender<String>,
) -> TurnJob {
    TurnJob {
        conversation,
        user_id: "u-1".to_string(),
        bearer_token: "tok-alice".to_string(),
        content: content.to_string(),
        origin_conn_id: conn_id.to_string(),
        reply_tx,
    }
}

async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed");
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn timezone_query_invokes_tool_and_composes_reply() {
    let model = ScriptedModel::new(vec![
        r#"{"action":"tool","name":"get_time","arguments":{"timezone":"America/New_York"}}"#,
        "It is 9:41 AM in New York (America/New_York).",
    ]);
    let invoker = Arc::new(MockInvoker::new(vec![InvocationOutcome::Success {
        text: "2026-08-07T09:41:00-04:00 America/New_York".to_string(),
    }]));
    let app = build_app(model, invoker.clone());

    app.registry
        .register("clock", "http://clock.example/rpc", "u-1")
        .unwrap();
    let conversation = app
        .conversations
        .create("u-1", None, MemoryStrategy::FullBuffer)
        .unwrap();
    let conv_id = conversation.id.clone();

    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    enqueue_turn(
        &app,
        job(
            conversation,
            "What time is it in New York right now?",
            "conn-a",
            reply_tx,
        ),
    )
    .await;

    let ack = recv_frame(&mut reply_rx).await;
    assert_eq!(ack["type"], "send_message");
    assert_eq!(ack["success"], true);

    let response = &ack["data"]["ai_response"];
    assert!(response["content"]
        .as_str()
        .unwrap()
        .contains("America/New_York"));
    assert_eq!(response["tool_call"]["outcome"], "success");
    assert_eq!(response["tool_call"]["name"], "get_time");

    // The caller's bearer token was forwarded to the tool server.
    {
        let tokens = invoker.seen_tokens.lock().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0], "tok-alice");
    }

    // Both records persisted, in order.
    let history = app.memory.store().load_history(&conv_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role.to_string(), "user");
    assert_eq!(history[1].role.to_string(), "assistant");
}

#[tokio::test]
async fn deactivated_server_means_direct_answer_without_tool_metadata() {
    let model = ScriptedModel::new(vec![
        "New York is on Eastern Time; I cannot check a live clock.",
    ]);
    let invoker = Arc::new(MockInvoker::new(vec![]));
    let app = build_app(model, invoker);

    let server = app
        .registry
        .register("clock", "http://clock.example/rpc", "u-1")
        .unwrap();
    app.registry.set_active(&server.id, false).unwrap();

    let conversation = app
        .conversations
        .create("u-1", None, MemoryStrategy::FullBuffer)
        .unwrap();

    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    enqueue_turn(
        &app,
        job(
            conversation,
            "What time is it in New York right now?",
            "conn-a",
            reply_tx,
        ),
    )
    .await;

    let ack = recv_frame(&mut reply_rx).await;
    assert_eq!(ack["success"], true);
    let response = &ack["data"]["ai_response"];
    assert!(response["content"].as_str().unwrap().contains("Eastern"));
    // No tool was dispatched, so the record carries no invocation metadata.
    assert!(response.get("tool_call").is_none());
}

#[tokio::test]
async fn tool_timeout_still_completes_the_turn() {
    let model = ScriptedModel::new(vec![
        r#"{"action":"tool","name":"get_time","arguments":{"timezone":"America/New_York"}}"#,
        "I could not reach a live clock, but New York is on Eastern Time.",
    ]);
    let invoker = Arc::new(MockInvoker::new(vec![InvocationOutcome::Timeout]));
    let app = build_app(model, invoker);

    app.registry
        .register("clock", "http://clock.example/rpc", "u-1")
        .unwrap();
    let conversation = app
        .conversations
        .create("u-1", None, MemoryStrategy::FullBuffer)
        .unwrap();

    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    enqueue_turn(
        &app,
        job(conversation, "Time in New York?", "conn-a", reply_tx),
    )
    .await;

    // The turn completed with a composed answer, not an error frame.
    let ack = recv_frame(&mut reply_rx).await;
    assert_eq!(ack["type"], "send_message");
    assert_eq!(ack["success"], true);
    assert_eq!(ack["data"]["ai_response"]["tool_call"]["outcome"], "timeout");
}

#[tokio::test]
async fn model_outage_surfaces_as_error_frame() {
    let model = ScriptedModel::new(vec![]); // every call fails
    let invoker = Arc::new(MockInvoker::new(vec![]));
    let app = build_app(model, invoker);

    let conversation = app
        .conversations
        .create("u-1", None, MemoryStrategy::FullBuffer)
        .unwrap();
    let conv_id = conversation.id.clone();

    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    enqueue_turn(&app, job(conversation, "hello", "conn-a", reply_tx)).await;

    let frame = recv_frame(&mut reply_rx).await;
    assert_eq!(frame["type"], "error");
    // Nothing was persisted for the failed turn.
    assert!(app.memory.store().load_history(&conv_id).unwrap().is_empty());
}

#[tokio::test]
async fn turns_on_one_conversation_process_in_arrival_order() {
    let model = ScriptedModel::new(vec!["first answer", "second answer"]);
    let invoker = Arc::new(MockInvoker::new(vec![]));
    let app = build_app(model, invoker);

    let conversation = app
        .conversations
        .create("u-1", None, MemoryStrategy::FullBuffer)
        .unwrap();
    let conv_id = conversation.id.clone();

    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    enqueue_turn(
        &app,
        job(
            conversation.clone(),
            "question one",
            "conn-a",
            reply_tx.clone(),
        ),
    )
    .await;
    enqueue_turn(
        &app,
        job(conversation, "question two", "conn-a", reply_tx),
    )
    .await;

    let first = recv_frame(&mut reply_rx).await;
    let second = recv_frame(&mut reply_rx).await;
    assert_eq!(first["data"]["ai_response"]["content"], "first answer");
    assert_eq!(second["data"]["ai_response"]["content"], "second answer");

    // Effects on memory did not interleave: u1, a1, u2, a2.
    let history = app.memory.store().load_history(&conv_id).unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        ["question one", "first answer", "question two", "second answer"]
    );
}

#[tokio::test]
async fn completed_turn_is_broadcast_to_co_joined_connections() {
    let model = ScriptedModel::new(vec!["hello from the assistant"]);
    let invoker = Arc::new(MockInvoker::new(vec![]));
    let app = build_app(model, invoker);

    let conversation = app
        .conversations
        .create("u-1", None, MemoryStrategy::FullBuffer)
        .unwrap();
    let conv_id = conversation.id.clone();

    // A second viewer is subscribed to the same conversation.
    let (viewer_tx, mut viewer_rx) = mpsc::channel(8);
    app.hub.subscribe(&conv_id, "conn-b", viewer_tx);

    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    app.hub.subscribe(&conv_id, "conn-a", reply_tx.clone());
    enqueue_turn(&app, job(conversation, "hi", "conn-a", reply_tx)).await;

    let ack = recv_frame(&mut reply_rx).await;
    assert_eq!(ack["type"], "send_message");

    let broadcast = recv_frame(&mut viewer_rx).await;
    assert_eq!(broadcast["type"], "message_broadcast");
    assert_eq!(
        broadcast["data"]["ai_response"]["content"],
        "hello from the assistant"
    );
    // The originator got the ack, not a duplicate broadcast.
    assert!(reply_rx.try_recv().is_err());
}
