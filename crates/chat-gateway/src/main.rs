use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chat_core::config::{ChatConfig, EngineConfig as CoreEngineConfig};
use chat_engine::{ConversationEngine, EngineConfig, SystemPromptCell};
use chat_llm::LlmProvider;
use chat_retrieval::{LocalEmbedder, RetrievalStore};
use chat_store::ConversationStore;
use tracing::{info, warn};

mod app;
mod auth;
mod http;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > CHATD_CONFIG env > ~/.chatd/chatd.toml
    let config_path = std::env::var("CHATD_CONFIG").ok();
    let config = ChatConfig::load(config_path.as_deref())?;

    let store = Arc::new(build_store(&config)?);
    let retrieval = Arc::new(build_retrieval(&config)?);

    info!("ingesting documents from {}", config.retrieval.docs_folder);
    retrieval.reload().await?;

    let llm = build_llm(&config)?;
    let system_prompt = Arc::new(SystemPromptCell::new(config.engine.system_prompt.clone()));
    let engine = Arc::new(ConversationEngine::new(
        store.clone(),
        retrieval.clone(),
        llm,
        system_prompt.clone(),
        engine_config(&config)?,
    ));

    let bind = config.gateway.host.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, store, retrieval, engine, system_prompt));
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("chat gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_store(config: &ChatConfig) -> anyhow::Result<ConversationStore> {
    let path = Path::new(&config.database.path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(path)?;
    chat_store::db::init_db(&conn)?;
    Ok(ConversationStore::new(conn))
}

fn build_retrieval(config: &ChatConfig) -> anyhow::Result<RetrievalStore> {
    let path = Path::new(&config.database.retrieval_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(path)?;
    let embedder: Arc<dyn chat_retrieval::Embedder> = Arc::new(LocalEmbedder::new()?);
    let docs_folder = PathBuf::from(&config.retrieval.docs_folder);
    std::fs::create_dir_all(&docs_folder)?;
    Ok(RetrievalStore::new(conn, embedder, docs_folder, config.retrieval.score_floor)?)
}

fn build_llm(config: &ChatConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let router = chat_llm::build_router(&config.providers)?;
    Ok(Arc::new(router))
}

fn engine_config(config: &ChatConfig) -> anyhow::Result<EngineConfig> {
    let CoreEngineConfig {
        max_tokens,
        max_history_messages,
        summary_threshold,
        keep_tail,
        llm_timeout_secs,
        ..
    } = config.engine.clone();

    let model = config
        .providers
        .primary_model()
        .ok_or_else(|| anyhow::anyhow!("no LLM provider configured"))?
        .to_string();

    Ok(EngineConfig {
        model,
        max_tokens,
        max_history_messages,
        summary_threshold,
        keep_tail,
        top_k: config.retrieval.top_k,
        llm_timeout: Duration::from_secs(llm_timeout_secs),
    })
}

/// Waits for SIGTERM (or Ctrl-C locally), then gives in-flight turns a
/// grace window before axum stops accepting new connections and drains.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        grace_secs = chat_core::config::SHUTDOWN_GRACE_SECS,
        "shutdown signal received, draining in-flight turns"
    );
    tokio::time::sleep(Duration::from_secs(chat_core::config::SHUTDOWN_GRACE_SECS)).await;
}
