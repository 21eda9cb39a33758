//! Thin HTTP bindings over `ConversationStore`/`RetrievalStore` methods and
//! the engine's system-prompt cell. No business logic lives here — each
//! handler is a direct wrapper, guarded by [`crate::auth::require_admin`].

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chat_core::types::ConversationId;
use chat_retrieval::{DocumentInfo, RetrievalError};
use chat_store::{ConversationExport, Conversation, StoreError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::AppState;

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

fn internal_error(context: &str, err: impl std::fmt::Display) -> ApiError {
    warn!(context, error = %err, "admin request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: err.to_string() }))
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::ConversationNotFound { id } => {
            (StatusCode::NOT_FOUND, Json(ErrorBody { error: format!("conversation not found: {id}") }))
        }
        other => internal_error("store", other),
    }
}

fn retrieval_error(err: RetrievalError) -> ApiError {
    match err {
        RetrievalError::DocumentNotFound { id } => {
            (StatusCode::NOT_FOUND, Json(ErrorBody { error: format!("document not found: {id}") }))
        }
        other => internal_error("retrieval", other),
    }
}

#[derive(Serialize)]
pub struct PromptBody {
    pub prompt: String,
}

#[derive(Deserialize)]
pub struct SetPromptBody {
    pub prompt: String,
}

/// GET /admin/prompt
pub async fn get_prompt(State(state): State<Arc<AppState>>) -> Json<PromptBody> {
    Json(PromptBody { prompt: state.system_prompt.get() })
}

/// POST /admin/prompt — atomic swap; takes effect on the next turn.
pub async fn set_prompt(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetPromptBody>,
) -> StatusCode {
    state.system_prompt.set(body.prompt);
    StatusCode::OK
}

/// GET /admin/documents
pub async fn list_documents(State(state): State<Arc<AppState>>) -> Result<Json<Vec<DocumentInfo>>, ApiError> {
    state.retrieval.list_documents().map(Json).map_err(retrieval_error)
}

/// POST /admin/documents — multipart file upload; the part's filename
/// becomes the document id.
pub async fn add_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| internal_error("multipart", e))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(|e| internal_error("multipart", e))?;
        let text = String::from_utf8_lossy(&bytes).to_string();
        state.retrieval.add_document(&name, &text).await.map_err(retrieval_error)?;
        return Ok(StatusCode::OK);
    }
    Ok(StatusCode::BAD_REQUEST)
}

/// DELETE /admin/documents/{name}
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.retrieval.delete_document(&name).map_err(retrieval_error)?;
    Ok(StatusCode::OK)
}

/// POST /admin/reload — re-scan the configured documents folder.
pub async fn reload(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.retrieval.reload().await.map_err(retrieval_error)?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Serialize)]
pub struct ConversationList {
    pub total: usize,
    pub conversations: Vec<Conversation>,
}

/// GET /admin/conversations?limit&offset
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ConversationList>, ApiError> {
    let (total, conversations) = state.store.list(query.limit, query.offset).map_err(store_error)?;
    Ok(Json(ConversationList { total, conversations }))
}

/// GET /admin/conversations/{id}/download
pub async fn download_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationExport>, ApiError> {
    state.store.export(&ConversationId::from(id)).map(Json).map_err(store_error)
}

/// DELETE /admin/conversations/{id}
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&ConversationId::from(id)).map_err(store_error)?;
    Ok(StatusCode::OK)
}
