use std::sync::Arc;

use parley_core::types::MemoryStrategy;
use parley_protocol::frames::{ClientFrame, InboundFrame, ServerFrame};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::turn::{self, TurnJob};
use crate::ws::connection::ConnState;

/// Process one inbound WS text frame. Returns the new connection state.
pub async fn handle(
    conn_id: &str,
    text: &str,
    state: ConnState,
    outbound_tx: &mpsc::Sender<String>,
    app: &Arc<AppState>,
) -> ConnState {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id, error = %e, "malformed frame");
            send(outbound_tx, ServerFrame::error("malformed frame")).await;
            return state;
        }
    };

    let Some(client_frame) = frame.parse() else {
        warn!(conn_id, frame_type = %frame.frame_type, "unknown or invalid frame");
        send(outbound_tx, ServerFrame::error("unknown or invalid frame")).await;
        return state;
    };

    match state {
        ConnState::AwaitingAuth => handle_auth(conn_id, client_frame, outbound_tx, app).await,
        ConnState::Authenticated { ctx, token } => {
            handle_frame(conn_id, client_frame, &ctx, &token, outbound_tx, app).await;
            ConnState::Authenticated { ctx, token }
        }
        ConnState::Closing => ConnState::Closing,
    }
}

/// Pre-auth: only the `auth` frame is accepted.
async fn handle_auth(
    conn_id: &str,
    frame: ClientFrame,
    outbound_tx: &mpsc::Sender<String>,
    app: &Arc<AppState>,
) -> ConnState {
    let ClientFrame::Auth { token } = frame else {
        send(outbound_tx, ServerFrame::error("must authenticate first")).await;
        return ConnState::AwaitingAuth;
    };

    match app.auth.validate(&token).await {
        Ok(ctx) => {
            let conversation_count = app
                .conversations
                .count_for_user(&ctx.user_id)
                .unwrap_or(0);
            info!(conn_id, user = %ctx.user_id, "client authenticated");
            send(
                outbound_tx,
                ServerFrame::AuthOk {
                    protocol: parley_core::config::PROTOCOL_VERSION,
                    user_id: ctx.user_id.clone(),
                    conversation_count,
                },
            )
            .await;
            ConnState::Authenticated { ctx, token }
        }
        Err(e) => {
            warn!(conn_id, error = %e, "auth failed");
            send(outbound_tx, ServerFrame::error("invalid token")).await;
            ConnState::Closing
        }
    }
}

/// Post-auth frame dispatch.
async fn handle_frame(
    conn_id: &str,
    frame: ClientFrame,
    ctx: &parley_protocol::handshake::AuthContext,
    token: &str,
    outbound_tx: &mpsc::Sender<String>,
    app: &Arc<AppState>,
) {
    match frame {
        ClientFrame::Auth { .. } => {
            // Already authenticated — ignore.
        }

        ClientFrame::SendMessage {
            conversation_id,
            content,
        } => {
            if content.is_empty() {
                send(outbound_tx, ServerFrame::error("message cannot be empty")).await;
                return;
            }

            // Lazy creation: a message without a conversation id starts a
            // new conversation with the default strategy.
            let conversation = match conversation_id {
                Some(id) => match app.conversations.get_active(&id) {
                    Ok(conversation) => conversation,
                    Err(e) => {
                        send(outbound_tx, ServerFrame::error(e.to_string())).await;
                        return;
                    }
                },
                None => match app
                    .conversations
                    .create(&ctx.user_id, None, MemoryStrategy::default())
                {
                    Ok(conversation) => conversation,
                    Err(e) => {
                        warn!(conn_id, error = %e, "conversation create failed");
                        send(outbound_tx, ServerFrame::error("could not start conversation")).await;
                        return;
                    }
                },
            };

            // Subscribe the sender so it also receives broadcasts from
            // co-joined clients; its own turns come back as acks.
            app.hub
                .subscribe(&conversation.id, conn_id, outbound_tx.clone());

            turn::enqueue_turn(
                app,
                TurnJob {
                    conversation,
                    user_id: ctx.user_id.clone(),
                    bearer_token: token.to_string(),
                    content,
                    origin_conn_id: conn_id.to_string(),
                    reply_tx: outbound_tx.clone(),
                },
            )
            .await;
        }

        ClientFrame::StartConversation {
            title,
            memory_strategy,
        } => {
            let strategy = memory_strategy.unwrap_or_default();
            match app
                .conversations
                .create(&ctx.user_id, title.as_deref(), strategy)
            {
                Ok(conversation) => {
                    app.hub
                        .subscribe(&conversation.id, conn_id, outbound_tx.clone());
                    let payload =
                        serde_json::to_value(&conversation).unwrap_or(serde_json::Value::Null);
                    send(
                        outbound_tx,
                        ServerFrame::ConversationStarted {
                            conversation: payload,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    warn!(conn_id, error = %e, "conversation create failed");
                    send(outbound_tx, ServerFrame::error("could not start conversation")).await;
                }
            }
        }

        ClientFrame::EndConversation { conversation_id } => {
            match app
                .conversations
                .close(&conversation_id, &ctx.user_id, ctx.is_admin())
            {
                Ok(()) => {
                    // The memory cache never outlives its conversation.
                    app.memory.clear(&conversation_id);
                    turn::stop_worker(app, &conversation_id);
                    app.hub.remove_conversation(&conversation_id);
                    send(
                        outbound_tx,
                        ServerFrame::ConversationEnded { conversation_id },
                    )
                    .await;
                }
                Err(e) => {
                    send(outbound_tx, ServerFrame::error(e.to_string())).await;
                }
            }
        }
    }
}

async fn send(outbound_tx: &mpsc::Sender<String>, frame: ServerFrame) {
    let _ = outbound_tx.send(frame.to_json()).await;
}
