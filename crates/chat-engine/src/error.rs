use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] chat_store::StoreError),

    #[error("llm provider error: {0}")]
    Llm(#[from] chat_llm::ProviderError),

    #[error("turn timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("turn cancelled")]
    Cancelled,

    #[error("session disconnected")]
    SessionGone,
}

pub type Result<T> = std::result::Result<T, EngineError>;
