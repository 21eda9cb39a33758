use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {conn_id}")]
    NotFound { conn_id: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
