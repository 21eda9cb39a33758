use std::sync::Mutex;

use chat_core::types::{ConnId, ConversationId};
use chat_protocol::OutboundFrame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Coarse per-connection state. Transitions are driven entirely by the
/// session task that owns this `Session` — no other task mutates `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    ConversationBound,
    Responding,
    Closing,
}

/// In-memory state for one WebSocket connection.
///
/// Owned by the session task for the lifetime of the connection and
/// destroyed on disconnect — nothing here is persisted. The outbound
/// channel is bounded; a full queue makes the engine's emitter block
/// rather than drop frames, satisfying the backpressure contract.
pub struct Session {
    pub conn_id: ConnId,
    conversation_id: Mutex<Option<ConversationId>>,
    state: Mutex<SessionState>,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    /// Cancellation handle for whatever turn task is currently in flight.
    /// `None` when the session is idle (Connected/ConversationBound).
    current_turn: Mutex<Option<CancellationToken>>,
}

impl Session {
    pub fn new(conn_id: ConnId, outbound_tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            conn_id,
            conversation_id: Mutex::new(None),
            state: Mutex::new(SessionState::Connected),
            outbound_tx,
            current_turn: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id.lock().unwrap().clone()
    }

    /// Bind (or rebind) this session to a conversation and move to
    /// `ConversationBound`. A session may rebind at any time by sending
    /// another `start_conversation` frame.
    pub fn bind_conversation(&self, conv_id: ConversationId) {
        *self.conversation_id.lock().unwrap() = Some(conv_id);
        *self.state.lock().unwrap() = SessionState::ConversationBound;
    }

    /// Start a new turn: cancels any turn already in flight, installs a
    /// fresh cancellation token, and moves to `Responding`. Returns the new
    /// token so the caller can pass it down to the LLM Gateway call.
    pub fn begin_turn(&self) -> CancellationToken {
        let mut current = self.current_turn.lock().unwrap();
        if let Some(previous) = current.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        *current = Some(token.clone());
        *self.state.lock().unwrap() = SessionState::Responding;
        token
    }

    /// Mark the in-flight turn complete and return to `ConversationBound`.
    /// A no-op if the session has since moved to `Closing`.
    pub fn end_turn(&self) {
        *self.current_turn.lock().unwrap() = None;
        let mut state = self.state.lock().unwrap();
        if *state != SessionState::Closing {
            *state = SessionState::ConversationBound;
        }
    }

    pub fn begin_closing(&self) {
        if let Some(token) = self.current_turn.lock().unwrap().take() {
            token.cancel();
        }
        *self.state.lock().unwrap() = SessionState::Closing;
    }

    /// Send an outbound frame, blocking if the queue is full rather than
    /// dropping it. Fails only once the receiving half (the socket writer)
    /// has gone away.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), mpsc::error::SendError<OutboundFrame>> {
        self.outbound_tx.send(frame).await
    }
}
