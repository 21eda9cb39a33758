use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use chat_core::config::ChatConfig;
use chat_engine::{ConversationEngine, SystemPromptCell};
use chat_retrieval::RetrievalStore;
use chat_sessions::SessionRegistry;
use chat_store::ConversationStore;

/// Central shared state — passed as `Arc<AppState>` to every Axum handler.
pub struct AppState {
    pub config: ChatConfig,
    pub store: Arc<ConversationStore>,
    pub retrieval: Arc<RetrievalStore>,
    pub engine: Arc<ConversationEngine>,
    pub system_prompt: Arc<SystemPromptCell>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(
        config: ChatConfig,
        store: Arc<ConversationStore>,
        retrieval: Arc<RetrievalStore>,
        engine: Arc<ConversationEngine>,
        system_prompt: Arc<SystemPromptCell>,
    ) -> Self {
        Self {
            config,
            store,
            retrieval,
            engine,
            system_prompt,
            sessions: SessionRegistry::new(),
        }
    }
}

/// Assemble the full Axum router: the `/ws` upgrade, health probes, and the
/// bearer-guarded admin surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/prompt",
            get(crate::http::admin::get_prompt).post(crate::http::admin::set_prompt),
        )
        .route(
            "/admin/documents",
            get(crate::http::admin::list_documents).post(crate::http::admin::add_document),
        )
        .route("/admin/documents/{name}", delete(crate::http::admin::delete_document))
        .route("/admin/reload", post(crate::http::admin::reload))
        .route("/admin/conversations", get(crate::http::admin::list_conversations))
        .route(
            "/admin/conversations/{id}/download",
            get(crate::http::admin::download_conversation),
        )
        .route("/admin/conversations/{id}", delete(crate::http::admin::delete_conversation))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_admin));

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/healthz", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .merge(admin_routes)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
