use std::sync::Arc;
use std::time::Duration;

use chat_core::types::{ChunkId, ConversationId, Emotion};
use chat_llm::{ChatRequest, LlmProvider, ProviderError, StreamEvent};
use chat_protocol::OutboundFrame;
use chat_retrieval::RetrievalStore;
use chat_sessions::Session;
use chat_store::{ConversationStore, NewMessage};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::{EngineError, Result};
use crate::prompt::{self, AssembledPrompt};
use crate::segmenter::{Segment, Segmenter};
use crate::summarizer;

/// Sentence emitted when the model produces only whitespace for a turn.
const EMPTY_STREAM_FALLBACK: &str = "I don't have a response for that right now.";
/// Sentence emitted when the provider fails or times out mid-turn.
const LLM_FAILURE_APOLOGY: &str = "Sorry, I ran into a problem generating a response. Please try again.";

/// Shared admin-mutable system prompt. Readers see a complete string or
/// its predecessor, never a torn write — `RwLock<String>` gives that for
/// free since every read/write is a full-string copy or replace.
#[derive(Debug, Default)]
pub struct SystemPromptCell(std::sync::RwLock<String>);

impl SystemPromptCell {
    pub fn new(initial: String) -> Self {
        Self(std::sync::RwLock::new(initial))
    }

    pub fn get(&self) -> String {
        self.0.read().unwrap().clone()
    }

    pub fn set(&self, prompt: String) {
        *self.0.write().unwrap() = prompt;
    }
}

/// Per-turn tunables resolved once from config at startup.
pub struct EngineConfig {
    pub model: String,
    pub max_tokens: u32,
    pub max_history_messages: usize,
    pub summary_threshold: usize,
    pub keep_tail: usize,
    pub top_k: usize,
    pub llm_timeout: Duration,
}

/// Orchestrates one conversation's turns: prompt assembly, streamed LLM
/// invocation, emotion segmentation, persistence, and background
/// summarisation. Stateless across turns — all durable state lives in the
/// stores it holds references to.
pub struct ConversationEngine {
    store: Arc<ConversationStore>,
    retrieval: Arc<RetrievalStore>,
    llm: Arc<dyn LlmProvider>,
    system_prompt: Arc<SystemPromptCell>,
    config: EngineConfig,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<ConversationStore>,
        retrieval: Arc<RetrievalStore>,
        llm: Arc<dyn LlmProvider>,
        system_prompt: Arc<SystemPromptCell>,
        config: EngineConfig,
    ) -> Self {
        Self { store, retrieval, llm, system_prompt, config }
    }

    /// Run one full turn: persist the user message, assemble the prompt,
    /// stream the assistant reply as emotion-segmented frames, and (if the
    /// conversation has crossed its threshold) kick off a background
    /// summarisation. `cancel` is the token the session hands out from
    /// `Session::begin_turn`; cancelling it aborts the in-flight LLM call.
    #[instrument(skip(self, session, cancel), fields(conversation_id = %conv_id))]
    pub async fn run_turn(
        &self,
        session: &Session,
        conv_id: ConversationId,
        user_content: String,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.store.append_message(&conv_id, NewMessage::user(user_content.clone()))?;

        let conversation = self.store.get(&conv_id)?;
        let history = self.store.load_window(&conv_id, self.config.max_history_messages)?;

        let passages = match self.retrieval.query(&user_content, self.config.top_k).await {
            Ok(p) => p,
            Err(e) => {
                warn!(conversation_id = %conv_id, error = %e, "retrieval query failed, degrading without augmentation");
                Vec::new()
            }
        };

        let system_prompt = self.system_prompt.get();
        let assembled: AssembledPrompt = prompt::assemble(
            &system_prompt,
            conversation.summary.as_deref(),
            &history,
            &passages,
            &user_content,
        );

        let req = ChatRequest {
            model: self.config.model.clone(),
            system: assembled.system,
            messages: assembled.messages,
            max_tokens: self.config.max_tokens,
            stream: true,
        };

        let chunk_id = ChunkId::new();
        let outcome = self.stream_turn(session, &conv_id, &chunk_id, &assembled.source_document_ids, req, cancel).await;

        if let Err(e) = &outcome {
            warn!(conversation_id = %conv_id, error = %e, "turn ended with an error after partial persistence");
        }

        summarizer::maybe_trigger(
            self.store.clone(),
            self.llm.clone(),
            conv_id,
            self.config.model.clone(),
            self.config.summary_threshold,
            self.config.keep_tail,
        );

        outcome
    }

    async fn stream_turn(
        &self,
        session: &Session,
        conv_id: &ConversationId,
        chunk_id: &ChunkId,
        sources: &[String],
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamEvent>(32);
        let llm = self.llm.clone();
        let stream_task = tokio::spawn(async move { llm.send_stream(&req, tx).await });

        let mut segmenter = Segmenter::new();
        let mut pending: Option<Segment> = None;

        enum Ended {
            Done,
            Cancelled,
            TimedOut,
            Failed(ProviderError),
            /// The session's outbound queue is gone (writer half dropped) —
            /// the connection is closing, not merely idle.
            SessionGone,
        }

        // One deadline for the whole turn, not per-token: a provider that
        // keeps streaming text must still be cut off at `llm_timeout`.
        let deadline = tokio::time::sleep(self.config.llm_timeout);
        tokio::pin!(deadline);

        let ended = 'turn: loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ended::Cancelled,
                _ = &mut deadline => break Ended::TimedOut,
                event = rx.recv() => match event {
                    Some(StreamEvent::TextDelta { text }) => {
                        for seg in segmenter.push(&text) {
                            if let Some(prev) = pending.replace(seg) {
                                if self.emit_segment(session, conv_id, chunk_id, sources, prev, false).await.is_err() {
                                    break 'turn Ended::SessionGone;
                                }
                            }
                        }
                    }
                    Some(StreamEvent::Done { .. }) => break Ended::Done,
                    Some(StreamEvent::Error { message }) => {
                        break Ended::Failed(ProviderError::Unavailable(message));
                    }
                    None => {
                        // Borrow rather than consume: `stream_task.abort()`
                        // below still needs the handle after this resolves.
                        match (&mut stream_task).await {
                            Ok(Ok(())) => break Ended::Done,
                            Ok(Err(e)) => break Ended::Failed(e),
                            Err(join_err) => break Ended::Failed(ProviderError::Unavailable(join_err.to_string())),
                        }
                    }
                },
            }
        };

        match ended {
            Ended::SessionGone => {
                stream_task.abort();
                Err(EngineError::SessionGone)
            }
            Ended::Cancelled | Ended::Done => {
                stream_task.abort();
                let tail = segmenter.finish();
                let tail_is_blank = tail.text.trim().is_empty();

                // `pending` (if any) is always one segment behind — we never
                // know a segment is the turn's last until the stream actually
                // ends, so emission of the held-back one is deferred to here.
                // A blank tail (no more real content, possibly whitespace)
                // never gets its own frame — it just confirms `pending` (or,
                // if there is none, the whole-stream fallback) is the final one.
                if let Some(prev) = pending.take() {
                    if tail_is_blank {
                        self.emit_segment(session, conv_id, chunk_id, sources, prev, true).await?;
                    } else {
                        self.emit_segment(session, conv_id, chunk_id, sources, prev, false).await?;
                        self.emit_segment(session, conv_id, chunk_id, sources, tail, true).await?;
                    }
                } else if !tail_is_blank {
                    self.emit_segment(session, conv_id, chunk_id, sources, tail, true).await?;
                } else {
                    self.emit_segment(
                        session,
                        conv_id,
                        chunk_id,
                        sources,
                        Segment { text: EMPTY_STREAM_FALLBACK.to_string(), emotion: Emotion::Neutral },
                        true,
                    )
                    .await?;
                }
                Ok(())
            }
            Ended::TimedOut | Ended::Failed(_) => {
                stream_task.abort();
                self.emit_segment(
                    session,
                    conv_id,
                    chunk_id,
                    sources,
                    Segment { text: LLM_FAILURE_APOLOGY.to_string(), emotion: Emotion::Concerned },
                    true,
                )
                .await?;
                match ended {
                    Ended::TimedOut => Err(EngineError::Timeout { secs: self.config.llm_timeout.as_secs() }),
                    Ended::Failed(e) => Err(EngineError::Llm(e)),
                    _ => unreachable!(),
                }
            }
        }
    }

    async fn emit_segment(
        &self,
        session: &Session,
        conv_id: &ConversationId,
        chunk_id: &ChunkId,
        sources: &[String],
        segment: Segment,
        is_final: bool,
    ) -> Result<()> {
        if segment.text.is_empty() && !is_final {
            return Ok(());
        }

        let emotion_str = segment.emotion.as_str();
        let msg = NewMessage::assistant(segment.text.clone(), emotion_str, sources.to_vec(), chunk_id.clone());
        self.store.append_message(conv_id, msg)?;

        let frame = OutboundFrame::message(segment.text, segment.emotion, chunk_id.clone(), is_final, conv_id, sources.to_vec());
        if session.send(frame).await.is_err() {
            // Writer half gone: the socket is closing out from under us.
            // Abort the turn rather than keep persisting segments nobody
            // will ever receive.
            session.begin_closing();
            return Err(EngineError::SessionGone);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chat_core::types::ConnId;
    use chat_llm::ChatResponse;
    use chat_retrieval::{Embedder, RetrievalStore};
    use chat_sessions::Session;
    use chat_store::ConversationStore;
    use std::time::Duration as StdDuration;
    use tokio::sync::mpsc;

    struct ZeroEmbedder;

    impl Embedder for ZeroEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, chat_retrieval::RetrievalError> {
            Ok(vec![0.0; 8])
        }
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, chat_retrieval::RetrievalError> {
            Ok(texts.iter().map(|_| vec![0.0; 8]).collect())
        }
        fn dimension(&self) -> usize {
            8
        }
    }

    struct ScriptedProvider {
        chunks: Vec<(String, Option<StdDuration>)>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            unimplemented!("tests only exercise send_stream")
        }

        async fn send_stream(
            &self,
            _req: &ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> std::result::Result<(), ProviderError> {
            for (text, delay) in &self.chunks {
                if let Some(d) = delay {
                    tokio::time::sleep(*d).await;
                }
                if tx.send(StreamEvent::TextDelta { text: text.clone() }).await.is_err() {
                    return Ok(());
                }
            }
            let _ = tx
                .send(StreamEvent::Done {
                    model: "test-model".to_string(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "stop".to_string(),
                })
                .await;
            Ok(())
        }
    }

    fn make_engine(provider: ScriptedProvider) -> (Arc<ConversationStore>, ConversationEngine, tempfile::TempDir) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        chat_store::db::init_db(&conn).unwrap();
        let store = Arc::new(ConversationStore::new(conn));

        let ret_conn = rusqlite::Connection::open_in_memory().unwrap();
        let docs_dir = tempfile::tempdir().unwrap();
        let retrieval = Arc::new(
            RetrievalStore::new(ret_conn, Arc::new(ZeroEmbedder), docs_dir.path().to_path_buf(), 0.2).unwrap(),
        );

        let engine = ConversationEngine::new(
            store.clone(),
            retrieval,
            Arc::new(provider),
            Arc::new(SystemPromptCell::new("You are a test assistant.".to_string())),
            EngineConfig {
                model: "test-model".to_string(),
                max_tokens: 256,
                max_history_messages: 20,
                summary_threshold: 1000,
                keep_tail: 2,
                top_k: 4,
                llm_timeout: StdDuration::from_secs(5),
            },
        );
        (store, engine, docs_dir)
    }

    fn new_session() -> (Session, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(32);
        (Session::new(ConnId::new(), tx), rx)
    }

    #[tokio::test]
    async fn emotion_sentinels_produce_three_segments_with_last_marked_final() {
        let provider = ScriptedProvider {
            chunks: vec![(
                "Hi there. [[emotion:excited]]This is great![[emotion:thoughtful]]But consider…".to_string(),
                None,
            )],
        };
        let (store, engine, _docs_dir) = make_engine(provider);
        let conv_id = store.create_conversation().unwrap();
        let (session, mut rx) = new_session();
        let cancel = CancellationToken::new();

        engine
            .run_turn(&session, conv_id.clone(), "hello".to_string(), cancel)
            .await
            .unwrap();

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        let finals: Vec<_> = frames
            .iter()
            .filter(|f| matches!(f, OutboundFrame::Message { is_final: true, .. }))
            .collect();
        assert_eq!(finals.len(), 1);
        match frames.last().unwrap() {
            OutboundFrame::Message { content, is_final, .. } => {
                assert!(*is_final);
                assert!(!content.contains("[[emotion:"));
            }
            other => panic!("expected message frame, got {other:?}"),
        }

        let messages = store.load_all(&conv_id).unwrap();
        // 1 user message + 3 assistant segments
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "Hi there. ");
        assert_eq!(messages[1].emotion.as_deref(), Some("neutral"));
        assert_eq!(messages[3].emotion.as_deref(), Some("thoughtful"));
    }

    #[tokio::test]
    async fn whitespace_only_stream_falls_back_to_fixed_sentence() {
        let provider = ScriptedProvider { chunks: vec![("   \n  ".to_string(), None)] };
        let (store, engine, _docs_dir) = make_engine(provider);
        let conv_id = store.create_conversation().unwrap();
        let (session, _rx) = new_session();

        engine
            .run_turn(&session, conv_id.clone(), "hello".to_string(), CancellationToken::new())
            .await
            .unwrap();

        let messages = store.load_all(&conv_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, EMPTY_STREAM_FALLBACK);
    }

    #[tokio::test]
    async fn cancelling_mid_stream_persists_only_segments_emitted_so_far() {
        let provider = ScriptedProvider {
            chunks: vec![
                ("first segment. [[emotion:happy]]".to_string(), None),
                ("second segment, never finishes".to_string(), Some(StdDuration::from_secs(30))),
            ],
        };
        let (store, engine, _docs_dir) = make_engine(provider);
        let conv_id = store.create_conversation().unwrap();
        let (session, _rx) = new_session();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        engine
            .run_turn(&session, conv_id.clone(), "hello".to_string(), cancel)
            .await
            .unwrap();

        let messages = store.load_all(&conv_id).unwrap();
        // user message + exactly one persisted assistant segment ("first segment. ")
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "first segment. ");
        assert_eq!(messages[1].emotion.as_deref(), Some("neutral"));
    }
}
