//! The per-turn pipeline and the single-writer conversation workers.
//!
//! Every conversation gets a lazily-spawned worker task fed by an mpsc
//! queue. Frames enqueued for one conversation are processed strictly in
//! arrival order — two in-flight turns never interleave — while turns on
//! different conversations run concurrently on their own workers.

use std::sync::Arc;

use parley_agent::router::RouteDecision;
use parley_conversations::Conversation;
use parley_memory::types::{NewMessage, StoredMessage};
use parley_protocol::frames::{MessagePayload, ServerFrame, TurnData};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;

const WORKER_QUEUE_DEPTH: usize = 64;

/// One user turn, queued for the conversation's worker.
pub struct TurnJob {
    pub conversation: Conversation,
    pub user_id: String,
    /// The session's bearer token, forwarded to tool servers on the
    /// user's behalf — never a server-wide credential.
    pub bearer_token: String,
    pub content: String,
    pub origin_conn_id: String,
    /// Outbound channel of the originating connection (ack + errors).
    pub reply_tx: mpsc::Sender<String>,
}

/// Enqueue a turn on the conversation's worker, spawning it on first use.
pub async fn enqueue_turn(app: &Arc<AppState>, job: TurnJob) {
    let conversation_id = job.conversation.id.clone();
    let tx = app
        .workers
        .entry(conversation_id.clone())
        .or_insert_with(|| spawn_worker(Arc::clone(app)))
        .clone();

    if tx.send(job).await.is_err() {
        warn!(conversation_id, "turn worker is gone — dropping frame");
    }
}

/// Tear down a conversation's worker after `end_conversation`. Queued
/// turns still drain before the task exits.
pub fn stop_worker(app: &AppState, conversation_id: &str) {
    app.workers.remove(conversation_id);
}

fn spawn_worker(app: Arc<AppState>) -> mpsc::Sender<TurnJob> {
    let (tx, mut rx) = mpsc::channel::<TurnJob>(WORKER_QUEUE_DEPTH);
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            run_turn(&app, job).await;
        }
    });
    tx
}

/// The full pipeline for one turn:
/// memory → registry → router → invoke → compose → persist → broadcast.
///
/// Tool and routing failures degrade to a direct answer inside the
/// router/composer; the only user-visible failure is a model outage,
/// surfaced as an error frame on the originating connection.
pub async fn run_turn(app: &Arc<AppState>, job: TurnJob) {
    let conversation = &job.conversation;
    let strategy = conversation.memory_strategy;

    let context = match app.memory.get_context(&conversation.id, strategy).await {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(conversation = %conversation.id, error = %e, "context rebuild failed");
            send_error(&job, "unable to load conversation context").await;
            return;
        }
    };

    // Build the tool set once for the entire turn. A registry failure
    // degrades to an empty set, not a failed turn.
    let tools = match app.registry.list_active_tools(&job.user_id, false).await {
        Ok(tools) => tools,
        Err(e) => {
            warn!(error = %e, "tool discovery failed — continuing without tools");
            Vec::new()
        }
    };

    let decision = match app.router.decide(&context, &job.content, &tools).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!(conversation = %conversation.id, error = %e, "routing failed");
            send_error(&job, "unable to answer right now: model unavailable").await;
            return;
        }
    };

    // Dispatch the tool call. The registry re-checks the server here so a
    // call can never go out to an inactive or unregistered server, even
    // if the discovery cache was stale.
    let invocation = match &decision {
        RouteDecision::ToolCall {
            server_id,
            name,
            arguments,
        } => match app.registry.server_for_call(server_id) {
            Ok(server) => Some(
                app.invoker
                    .invoke(&server, name, arguments.clone(), &job.bearer_token)
                    .await,
            ),
            Err(e) => {
                warn!(tool = %name, error = %e, "dispatch refused");
                None
            }
        },
        RouteDecision::DirectAnswer { .. } => None,
    };

    let reply = match app
        .composer
        .compose(&context, &job.content, decision, invocation.as_ref())
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            warn!(conversation = %conversation.id, error = %e, "composition failed");
            send_error(&job, "unable to answer right now: model unavailable").await;
            return;
        }
    };

    // Persist both records through the memory manager so the cache and
    // the store stay in step under the per-conversation lock.
    let user_record = match app
        .memory
        .append(&conversation.id, strategy, NewMessage::user(job.content.clone()))
        .await
    {
        Ok(record) => record,
        Err(e) => {
            warn!(conversation = %conversation.id, error = %e, "persisting user message failed");
            send_error(&job, "unable to persist this turn").await;
            return;
        }
    };

    let mut assistant = NewMessage::assistant(reply.text.clone(), Some(reply.tokens));
    assistant.tool_call = reply.tool_call.clone();
    let assistant_record = match app.memory.append(&conversation.id, strategy, assistant).await {
        Ok(record) => record,
        Err(e) => {
            warn!(conversation = %conversation.id, error = %e, "persisting assistant message failed");
            send_error(&job, "unable to persist this turn").await;
            return;
        }
    };

    if let Err(e) = app
        .conversations
        .record_exchange(&conversation.id, reply.tokens as u64)
    {
        warn!(conversation = %conversation.id, error = %e, "stats update failed");
    }

    info!(
        conversation = %conversation.id,
        tokens = reply.tokens,
        tool = assistant_record
            .tool_call
            .as_ref()
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("-"),
        "turn complete"
    );

    let data = TurnData {
        conversation_id: conversation.id.clone(),
        user_message: to_payload(&user_record),
        ai_response: to_payload(&assistant_record),
    };

    let _ = job.reply_tx.send(ServerFrame::ack(data.clone()).to_json()).await;
    app.hub.broadcast_except(
        &conversation.id,
        &job.origin_conn_id,
        &ServerFrame::broadcast(data).to_json(),
    );
}

async fn send_error(job: &TurnJob, message: &str) {
    let _ = job
        .reply_tx
        .send(ServerFrame::error(message).to_json())
        .await;
}

fn to_payload(msg: &StoredMessage) -> MessagePayload {
    MessagePayload {
        id: msg.id,
        role: msg.role,
        content: msg.content.clone(),
        tokens: msg.tokens,
        tool_call: msg.tool_call.clone(),
        created_at: msg.created_at.clone(),
    }
}
