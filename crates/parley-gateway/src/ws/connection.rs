use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use parley_core::config::{HANDSHAKE_TIMEOUT_MS, MAX_PAYLOAD_BYTES};
use parley_protocol::handshake::AuthContext;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::ws::message;

/// Per-connection outbound queue depth. Turn workers and the broadcast
/// hub write here; the connection loop drains onto the socket.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// WS connection states — linear progression, no backwards transitions.
pub enum ConnState {
    AwaitingAuth,
    Authenticated { ctx: AuthContext, token: String },
    Closing,
}

/// Axum handler — upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_connection(socket, state))
}

/// Per-connection event loop — lives for the entire WS session.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "new WS connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel::<String>(OUTBOUND_QUEUE_DEPTH);

    let mut conn_state = ConnState::AwaitingAuth;

    // handshake must complete within 10s
    let deadline =
        tokio::time::Instant::now() + std::time::Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
    let mut handshake_timer = Box::pin(tokio::time::sleep_until(deadline));

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text.len(), "payload too large");
                            break;
                        }
                        conn_state = message::handle(
                            &conn_id, &text, conn_state, &outbound_tx, &state,
                        ).await;
                        if matches!(conn_state, ConnState::Closing) {
                            // flush queued frames (e.g. the auth error)
                            // before tearing the connection down
                            while let Ok(payload) = outbound_rx.try_recv() {
                                let _ = ws_tx.send(Message::Text(payload.into())).await;
                            }
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }

            payload = outbound_rx.recv() => {
                // Turn acks, broadcasts, and error frames all arrive here.
                if let Some(payload) = payload {
                    if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
            }

            _ = &mut handshake_timer => {
                if matches!(conn_state, ConnState::AwaitingAuth) {
                    warn!(conn_id, "handshake timeout");
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe_all(&conn_id);
    info!(conn_id, "WS connection closed");
}
