use chat_core::types::{ChunkId, ConversationId, MessageId, MessageRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: Option<String>,
    /// Sequence number of the last message folded into `summary`. `0` means
    /// nothing has been summarised yet.
    pub summary_covered_upto_seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Monotonic per-conversation sequence number assigned on append.
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Assistant-only: the emotion this segment carried.
    pub emotion: Option<String>,
    /// Assistant-only: document ids that contributed to this segment.
    pub sources: Vec<String>,
    /// Assistant-only: groups every segment of one LLM turn.
    pub chunk_id: Option<ChunkId>,
}

/// A message not yet assigned a seq/id/timestamp — what callers build
/// before handing it to [`crate::manager::ConversationStore::append_message`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub emotion: Option<String>,
    pub sources: Vec<String>,
    pub chunk_id: Option<ChunkId>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            emotion: None,
            sources: Vec::new(),
            chunk_id: None,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        emotion: &str,
        sources: Vec<String>,
        chunk_id: ChunkId,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            emotion: Some(emotion.to_string()),
            sources,
            chunk_id: Some(chunk_id),
        }
    }
}

/// A conversation with its full exported message history, for the admin
/// `export`/`download` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExport {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}
