use std::sync::Arc;

use axum::{routing::get, Router};
use dashmap::DashMap;
use parley_agent::{IntentRouter, ResponseComposer};
use parley_conversations::ConversationManager;
use parley_core::config::ParleyConfig;
use parley_mcp::types::ToolInvoker;
use parley_mcp::ToolRegistry;
use parley_memory::MemoryManager;
use tokio::sync::mpsc;

use crate::auth::TokenValidator;
use crate::turn::TurnJob;
use crate::ws::broadcast::ConversationHub;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ParleyConfig,
    pub auth: Arc<dyn TokenValidator>,
    pub registry: ToolRegistry,
    pub invoker: Arc<dyn ToolInvoker>,
    pub memory: MemoryManager,
    pub conversations: ConversationManager,
    pub router: IntentRouter,
    pub composer: ResponseComposer,
    pub hub: ConversationHub,
    /// Single-writer turn queues: conversation id -> worker inbox.
    /// Within one conversation turns run strictly in arrival order;
    /// different conversations are independent workers.
    pub workers: DashMap<String, mpsc::Sender<TurnJob>>,
}

#[allow(clippy::too_many_arguments)]
impl AppState {
    pub fn new(
        config: ParleyConfig,
        auth: Arc<dyn TokenValidator>,
        registry: ToolRegistry,
        invoker: Arc<dyn ToolInvoker>,
        memory: MemoryManager,
        conversations: ConversationManager,
        router: IntentRouter,
        composer: ResponseComposer,
    ) -> Self {
        Self {
            config,
            auth,
            registry,
            invoker,
            memory,
            conversations,
            router,
            composer,
            hub: ConversationHub::new(),
            workers: DashMap::new(),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
