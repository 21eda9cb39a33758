use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chat_core::config::{CLOSE_MESSAGE_TOO_BIG, MAX_PAYLOAD_BYTES};
use chat_core::types::ConversationId;
use chat_protocol::frames;
use chat_protocol::{InboundFrame, OutboundFrame};
use chat_sessions::{Session, SessionState};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth;

/// Axum handler — upgrades HTTP to WebSocket at `GET /ws`. Auth is resolved
/// before the upgrade completes: an invalid/missing token refuses the
/// upgrade outright rather than accepting then closing.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let token = auth::extract_ws_token(&headers, &query);
    if !auth::verify_ws_token(&state.config.gateway.api_key, token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, "invalid or missing API key").into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state)).into_response()
}

/// Per-connection task — lives for the entire WS session lifetime. Owns the
/// socket's write half exclusively, so both protocol-level errors and
/// engine-emitted frames (relayed through the session's outbound queue)
/// stay strictly FIFO on the wire.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (session, mut outbound_rx) = state.sessions.register();
    let conn_id = session.conn_id.clone();
    info!(%conn_id, "new WS connection");

    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_ref: &str = &text;
                        if text_ref.len() > MAX_PAYLOAD_BYTES {
                            warn!(%conn_id, size = text_ref.len(), "frame too large, closing");
                            let _ = send_frame(&mut tx, &OutboundFrame::error(
                                "message exceeds the maximum frame size",
                                frames::ERR_MESSAGE_TOO_LONG,
                            )).await;
                            close(&mut tx, CLOSE_MESSAGE_TOO_BIG, "frame too large").await;
                            break;
                        }
                        if !handle_text_frame(text_ref, &session, &state, &mut tx).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(%conn_id, error = %e, "WS read error, closing");
                        break;
                    }
                    _ => {}
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut tx, &frame).await.is_err() {
                            warn!(%conn_id, "outbound write failed, closing");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    session.begin_closing();
    state.sessions.unregister(&conn_id);
    info!(%conn_id, "WS connection closed");
}

/// Decode and dispatch one inbound text frame. Returns `false` when the
/// connection should close.
async fn handle_text_frame(
    text: &str,
    session: &Arc<Session>,
    state: &Arc<AppState>,
    tx: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) -> bool {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id = %session.conn_id, error = %e, "malformed frame, ignoring");
            let _ = send_frame(tx, &OutboundFrame::error("malformed frame", frames::ERR_INTERNAL_ERROR)).await;
            return true;
        }
    };

    match frame {
        InboundFrame::StartConversation { conversation_id } => {
            handle_start_conversation(conversation_id, session, state, tx).await;
        }
        InboundFrame::UserMessage { content } => {
            handle_user_message(content, session, state, tx).await;
        }
    }
    true
}

async fn handle_start_conversation(
    conversation_id: Option<String>,
    session: &Arc<Session>,
    state: &Arc<AppState>,
    tx: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) {
    let resolved = match conversation_id {
        Some(raw) => {
            let id = ConversationId::from(raw);
            match state.store.exists(&id) {
                Ok(true) => Ok(id),
                Ok(false) => Err((frames::ERR_CONVERSATION_NOT_FOUND, "conversation not found")),
                Err(e) => {
                    warn!(error = %e, "store error checking conversation existence");
                    Err((frames::ERR_INTERNAL_ERROR, "internal error"))
                }
            }
        }
        None => match state.store.create_conversation() {
            Ok(id) => Ok(id),
            Err(e) => {
                warn!(error = %e, "store error creating conversation");
                Err((frames::ERR_INTERNAL_ERROR, "internal error"))
            }
        },
    };

    match resolved {
        Ok(id) => {
            session.bind_conversation(id.clone());
            let _ = send_frame(tx, &OutboundFrame::conversation_started(&id)).await;
        }
        Err((code, message)) => {
            let _ = send_frame(tx, &OutboundFrame::error(message, code)).await;
        }
    }
}

async fn handle_user_message(
    content: String,
    session: &Arc<Session>,
    state: &Arc<AppState>,
    tx: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) {
    match session.state() {
        SessionState::Connected => {
            let _ = send_frame(
                tx,
                &OutboundFrame::error("no active conversation", frames::ERR_NO_ACTIVE_CONVERSATION),
            )
            .await;
        }
        SessionState::Closing => {}
        SessionState::ConversationBound | SessionState::Responding => {
            let Some(conv_id) = session.conversation_id() else {
                let _ = send_frame(
                    tx,
                    &OutboundFrame::error("no active conversation", frames::ERR_NO_ACTIVE_CONVERSATION),
                )
                .await;
                return;
            };
            let cancel = session.begin_turn();
            let session = session.clone();
            let engine = state.engine.clone();
            tokio::spawn(async move {
                let outcome = engine.run_turn(&session, conv_id, content, cancel).await;
                if let Err(chat_engine::EngineError::Store(e)) = &outcome {
                    warn!(error = %e, "store error appending user message");
                    let _ = session
                        .send(OutboundFrame::error("internal error", frames::ERR_INTERNAL_ERROR))
                        .await;
                }
                session.end_turn();
            });
        }
    }
}

async fn send_frame(
    tx: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &OutboundFrame,
) -> Result<(), axum::Error> {
    let json = frame.to_json().unwrap_or_default();
    tx.send(Message::Text(json.into())).await
}

async fn close(tx: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), code: u16, reason: &str) {
    let _ = tx
        .send(Message::Close(Some(CloseFrame { code, reason: reason.to_string().into() })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chat_core::config::{AdminConfig, ChatConfig, EngineConfig as CoreEngineConfig, GatewayConfig};
    use chat_engine::EngineConfig;
    use chat_llm::{ChatRequest, ChatResponse, LlmProvider, ProviderError, StreamEvent};
    use chat_retrieval::{Embedder, RetrievalError, RetrievalStore};
    use chat_sessions::SessionRegistry;
    use futures_util::sink;
    use std::time::Duration as StdDuration;
    use tokio::sync::mpsc;

    struct ZeroEmbedder;

    impl Embedder for ZeroEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
            Ok(vec![0.0; 8])
        }
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Ok(texts.iter().map(|_| vec![0.0; 8]).collect())
        }
        fn dimension(&self) -> usize {
            8
        }
    }

    struct NeverCalled;

    #[async_trait]
    impl LlmProvider for NeverCalled {
        fn name(&self) -> &str {
            "never-called"
        }
        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            unimplemented!("these tests never reach the LLM")
        }
        async fn send_stream(
            &self,
            _req: &ChatRequest,
            _tx: mpsc::Sender<StreamEvent>,
        ) -> std::result::Result<(), ProviderError> {
            unimplemented!("these tests never reach the LLM")
        }
    }

    fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        chat_store::db::init_db(&conn).unwrap();
        let store = Arc::new(chat_store::ConversationStore::new(conn));

        let ret_conn = rusqlite::Connection::open_in_memory().unwrap();
        let docs_dir = tempfile::tempdir().unwrap();
        let retrieval = Arc::new(
            RetrievalStore::new(ret_conn, Arc::new(ZeroEmbedder), docs_dir.path().to_path_buf(), 0.2).unwrap(),
        );

        let system_prompt = Arc::new(chat_engine::SystemPromptCell::new("You are a test assistant.".to_string()));
        let engine = Arc::new(chat_engine::ConversationEngine::new(
            store.clone(),
            retrieval.clone(),
            Arc::new(NeverCalled),
            system_prompt.clone(),
            EngineConfig {
                model: "test-model".to_string(),
                max_tokens: 256,
                max_history_messages: 20,
                summary_threshold: 1000,
                keep_tail: 2,
                top_k: 4,
                llm_timeout: StdDuration::from_secs(5),
            },
        ));

        let config = ChatConfig {
            gateway: GatewayConfig { host: "127.0.0.1".to_string(), port: 0, api_key: None },
            admin: AdminConfig { api_key: "test-admin".to_string() },
            engine: CoreEngineConfig {
                max_tokens: 256,
                max_history_messages: 20,
                summary_threshold: 1000,
                keep_tail: 2,
                system_prompt: "You are a test assistant.".to_string(),
                llm_timeout_secs: 5,
            },
            retrieval: chat_core::config::RetrievalConfig {
                docs_folder: docs_dir.path().to_string_lossy().to_string(),
                score_floor: 0.2,
                top_k: 4,
            },
            database: chat_core::config::DatabaseConfig {
                path: ":memory:".to_string(),
                retrieval_path: ":memory:".to_string(),
            },
            providers: chat_core::config::ProvidersConfig::default(),
        };

        (Arc::new(AppState::new(config, store, retrieval, engine, system_prompt)), docs_dir)
    }

    /// A sink that records every frame sent to it instead of writing to a
    /// real socket.
    fn recording_sink() -> (
        impl SinkExt<Message, Error = axum::Error> + Unpin,
        std::sync::Arc<std::sync::Mutex<Vec<Message>>>,
    ) {
        let sent = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sent_clone = sent.clone();
        let sink = sink::unfold((), move |_, msg: Message| {
            let sent = sent_clone.clone();
            async move {
                sent.lock().unwrap().push(msg);
                Ok::<_, axum::Error>(())
            }
        });
        (sink, sent)
    }

    fn as_text(msg: &Message) -> OutboundFrame {
        match msg {
            Message::Text(t) => serde_json::from_str(t).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_conversation_without_id_creates_new_one() {
        let (state, _docs) = test_state();
        let (session, _rx) = state.sessions.register();
        let (mut tx, sent) = recording_sink();

        handle_start_conversation(None, &session, &state, &mut tx).await;

        assert_eq!(session.state(), SessionState::ConversationBound);
        assert!(session.conversation_id().is_some());
        let frames = sent.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(as_text(&frames[0]), OutboundFrame::ConversationStarted { .. }));
    }

    #[tokio::test]
    async fn start_conversation_with_unknown_id_errors_and_stays_unbound() {
        let (state, _docs) = test_state();
        let (session, _rx) = state.sessions.register();
        let (mut tx, sent) = recording_sink();

        handle_start_conversation(Some("does-not-exist".to_string()), &session, &state, &mut tx).await;

        assert_eq!(session.state(), SessionState::Connected);
        let frames = sent.lock().unwrap();
        match as_text(&frames[0]) {
            OutboundFrame::Error { metadata, .. } => {
                assert_eq!(metadata.unwrap().error_code, frames::ERR_CONVERSATION_NOT_FOUND);
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_conversation_with_known_id_binds_it() {
        let (state, _docs) = test_state();
        let conv_id = state.store.create_conversation().unwrap();
        let (session, _rx) = state.sessions.register();
        let (mut tx, _sent) = recording_sink();

        handle_start_conversation(Some(conv_id.as_str().to_string()), &session, &state, &mut tx).await;

        assert_eq!(session.state(), SessionState::ConversationBound);
        assert_eq!(session.conversation_id(), Some(conv_id));
    }

    #[tokio::test]
    async fn user_message_without_bound_conversation_errors() {
        let (state, _docs) = test_state();
        let (session, _rx) = state.sessions.register();
        let (mut tx, sent) = recording_sink();

        handle_user_message("hello".to_string(), &session, &state, &mut tx).await;

        let frames = sent.lock().unwrap();
        assert_eq!(frames.len(), 1);
        match as_text(&frames[0]) {
            OutboundFrame::Error { metadata, .. } => {
                assert_eq!(metadata.unwrap().error_code, frames::ERR_NO_ACTIVE_CONVERSATION);
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn session_registry_tracks_connected_count() {
        let registry = SessionRegistry::new();
        let (_session, _rx) = registry.register();
        assert_eq!(registry.connected_count(), 1);
    }
}
