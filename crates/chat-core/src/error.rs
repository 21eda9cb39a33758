use thiserror::Error;

/// Error codes carried on the wire in `message`/`error` frame metadata and
/// admin HTTP error bodies. Every crate error type maps onto one of these
/// via `.code()`.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("no active conversation bound to this connection")]
    NoActiveConversation,

    #[error("message too long: {len} bytes (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("malformed client frame: {0}")]
    Protocol(String),

    #[error("frame exceeds {max} bytes")]
    FrameTooLarge { max: usize },

    #[error("database error: {0}")]
    Database(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Short machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Config(_) => "CONFIG_ERROR",
            ChatError::InvalidApiKey => "INVALID_API_KEY",
            ChatError::NoActiveConversation => "NO_ACTIVE_CONVERSATION",
            ChatError::MessageTooLong { .. } => "MESSAGE_TOO_LONG",
            ChatError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            ChatError::Protocol(_) => "PROTOCOL_ERROR",
            ChatError::FrameTooLarge { .. } => "FRAME_TOO_LARGE",
            ChatError::Database(_) => "INTERNAL_ERROR",
            ChatError::LlmProvider(_) => "INTERNAL_ERROR",
            ChatError::Retrieval(_) => "INTERNAL_ERROR",
            ChatError::Serialization(_) => "INTERNAL_ERROR",
            ChatError::Io(_) => "INTERNAL_ERROR",
            ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error should close the connection (vs. surface as an
    /// `error` frame and keep the session alive).
    pub fn is_connection_terminal(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidApiKey | ChatError::Protocol(_) | ChatError::FrameTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
