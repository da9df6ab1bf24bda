use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parley_gateway::app;
use parley_gateway::auth::StaticTokenValidator;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > PARLEY_CONFIG env > ~/.parley/parley.toml
    let config_path = std::env::var("PARLEY_CONFIG").ok();
    let config = parley_core::config::ParleyConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            parley_core::config::ParleyConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // initialize SQLite database — single file for all subsystems
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // run all schema migrations (idempotent)
    parley_conversations::db::init_db(&db)?;
    parley_memory::db::init_db(&db)?;
    parley_mcp::db::init_db(&db)?;
    info!("database migrations complete");

    // build subsystems — each gets its own connection for thread safety
    let conversations =
        parley_conversations::ConversationManager::new(rusqlite::Connection::open(db_path)?);

    let invoker: Arc<dyn parley_mcp::types::ToolInvoker> = Arc::new(
        parley_mcp::HttpToolClient::new(
            Duration::from_millis(config.tools.call_timeout_ms),
            Duration::from_millis(config.tools.discovery_timeout_ms),
        ),
    );
    let registry = parley_mcp::ToolRegistry::new(
        rusqlite::Connection::open(db_path)?,
        Arc::clone(&invoker),
        config.tools.cache_ttl_secs,
    );

    let model: Arc<dyn parley_agent::ModelClient> =
        Arc::new(parley_agent::openai::OpenAiCompatClient::new(
            config.model.api_key.clone(),
            config.model.base_url.clone(),
            config.model.model.clone(),
        ));
    info!(model = %config.model.model, "model client ready");

    let store: Arc<dyn parley_memory::MessageStore> = Arc::new(
        parley_memory::SqliteMessageStore::new(rusqlite::Connection::open(db_path)?),
    );
    let summarizer = Arc::new(parley_agent::ModelSummarizer::new(
        Arc::clone(&model),
        config.model.max_tokens,
    ));
    let memory = parley_memory::MemoryManager::new(
        store,
        summarizer,
        config.memory.summary_window_turns,
    );

    let router = parley_agent::IntentRouter::new(Arc::clone(&model), config.model.max_tokens);
    let composer =
        parley_agent::ResponseComposer::new(Arc::clone(&model), config.model.max_tokens);

    let auth = Arc::new(StaticTokenValidator::new(
        config.gateway.auth.tokens.clone(),
    ));

    let state = Arc::new(app::AppState::new(
        config,
        auth,
        registry,
        invoker,
        memory,
        conversations,
        router,
        composer,
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Parley gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
