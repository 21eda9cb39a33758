use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("summary update would regress covered_upto_seq ({current} -> {attempted})")]
    SummaryRegression { current: i64, attempted: i64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
