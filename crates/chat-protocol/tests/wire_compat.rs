// Verify wire format matches what the avatar client expects.
// These tests ensure protocol compatibility is never broken.

use chat_core::types::{ChunkId, ConversationId, Emotion};
use chat_protocol::frames::{InboundFrame, OutboundFrame};

#[test]
fn start_conversation_round_trip() {
    let json = r#"{"type":"start_conversation","conversation_id":"c-1"}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    match frame {
        InboundFrame::StartConversation { conversation_id } => {
            assert_eq!(conversation_id, Some("c-1".to_string()));
        }
        _ => panic!("expected start_conversation"),
    }
}

#[test]
fn user_message_round_trip() {
    let json = r#"{"type":"user_message","content":"hello there"}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    match frame {
        InboundFrame::UserMessage { content } => assert_eq!(content, "hello there"),
        _ => panic!("expected user_message"),
    }
}

#[test]
fn conversation_started_serialization() {
    let conv = ConversationId::from("c-123");
    let json = OutboundFrame::conversation_started(&conv).to_json().unwrap();
    assert!(json.contains(r#""type":"conversation_started""#));
    assert!(json.contains(r#""conversation_id":"c-123""#));
}

#[test]
fn message_frame_shares_chunk_id_and_carries_sources() {
    let conv = ConversationId::from("c-9");
    let chunk = ChunkId::new();
    let frame = OutboundFrame::message(
        "Paris is the capital of France.",
        Emotion::Neutral,
        chunk.clone(),
        true,
        &conv,
        vec!["docA.txt".to_string()],
    );
    let json = frame.to_json().unwrap();
    assert!(json.contains(r#""is_final":true"#));
    assert!(json.contains(&chunk.to_string()));
    assert!(json.contains(r#""conversation_id":"c-9""#));
    assert!(json.contains(r#""sources":["docA.txt"]"#));
}

#[test]
fn error_frame_carries_machine_code_and_concerned_emotion() {
    let frame = OutboundFrame::error("conversation not found", chat_protocol::frames::ERR_CONVERSATION_NOT_FOUND);
    let json = frame.to_json().unwrap();
    assert!(json.contains(r#""type":"error""#));
    assert!(json.contains(r#""emotion":"concerned""#));
    assert!(json.contains("CONVERSATION_NOT_FOUND"));
}

#[test]
fn unrecognised_inbound_type_rejected() {
    let json = r#"{"type":"ping"}"#;
    let result: Result<InboundFrame, _> = serde_json::from_str(json);
    assert!(result.is_err(), "unknown frame type must not parse");
}
