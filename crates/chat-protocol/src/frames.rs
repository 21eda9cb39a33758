use chat_core::types::{ChunkId, ConversationId, Emotion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error codes surfaced on the wire via `error` frames. Mirrors
/// [`chat_core::error::ChatError::code`] but is pinned to the subset the
/// client-facing protocol actually emits.
pub const ERR_INVALID_API_KEY: &str = "INVALID_API_KEY";
pub const ERR_NO_ACTIVE_CONVERSATION: &str = "NO_ACTIVE_CONVERSATION";
pub const ERR_MESSAGE_TOO_LONG: &str = "MESSAGE_TOO_LONG";
pub const ERR_CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
pub const ERR_INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// A client → server frame, tagged on `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    StartConversation {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    UserMessage {
        content: String,
    },
}

/// A server → client frame, tagged on `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    ConversationStarted {
        conversation_id: String,
    },
    Message {
        content: String,
        emotion: Emotion,
        chunk_id: ChunkId,
        is_final: bool,
        metadata: MessageMetadata,
    },
    Error {
        content: String,
        emotion: Emotion,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<ErrorMetadata>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMetadata {
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMetadata {
    pub error_code: &'static str,
}

impl OutboundFrame {
    pub fn conversation_started(id: &ConversationId) -> Self {
        OutboundFrame::ConversationStarted {
            conversation_id: id.as_str().to_string(),
        }
    }

    pub fn message(
        content: impl Into<String>,
        emotion: Emotion,
        chunk_id: ChunkId,
        is_final: bool,
        conversation_id: &ConversationId,
        sources: Vec<String>,
    ) -> Self {
        OutboundFrame::Message {
            content: content.into(),
            emotion,
            chunk_id,
            is_final,
            metadata: MessageMetadata {
                conversation_id: conversation_id.as_str().to_string(),
                timestamp: Utc::now(),
                sources,
            },
        }
    }

    /// A protocol-level or store-level error: emotion is always `concerned`
    /// and the session survives.
    pub fn error(content: impl Into<String>, code: &'static str) -> Self {
        OutboundFrame::Error {
            content: content.into(),
            emotion: Emotion::Concerned,
            metadata: Some(ErrorMetadata { error_code: code }),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_conversation_with_id_parses() {
        let json = r#"{"type":"start_conversation","conversation_id":"abc"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        match frame {
            InboundFrame::StartConversation { conversation_id } => {
                assert_eq!(conversation_id.as_deref(), Some("abc"));
            }
            _ => panic!("expected start_conversation"),
        }
    }

    #[test]
    fn start_conversation_without_id_parses() {
        let json = r#"{"type":"start_conversation"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(
            frame,
            InboundFrame::StartConversation { conversation_id: None }
        ));
    }

    #[test]
    fn user_message_parses() {
        let json = r#"{"type":"user_message","content":"Hello"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        match frame {
            InboundFrame::UserMessage { content } => assert_eq!(content, "Hello"),
            _ => panic!("expected user_message"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"bogus"}"#;
        let result: Result<InboundFrame, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn message_frame_serializes_flat() {
        let conv = ConversationId::from("c1");
        let frame = OutboundFrame::message(
            "hi",
            Emotion::Happy,
            ChunkId::new(),
            false,
            &conv,
            vec!["docA.txt".to_string()],
        );
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"message""#));
        assert!(json.contains(r#""emotion":"happy""#));
        assert!(json.contains(r#""is_final":false"#));
        assert!(json.contains(r#""docA.txt""#));
    }

    #[test]
    fn error_frame_always_concerned() {
        let frame = OutboundFrame::error("sorry, something broke", ERR_INTERNAL_ERROR);
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""emotion":"concerned""#));
        assert!(json.contains(ERR_INTERNAL_ERROR));
    }
}
