use chat_core::types::MessageRole;
use chat_llm::{Message as LlmMessage, Role as LlmRole};
use chat_retrieval::Passage;
use chat_store::Message as StoredMessage;

const SUMMARY_PREFIX: &str = "\n\n--- Summary of earlier conversation ---\n";
const RAG_HEADER: &str = "\n\n--- Relevant context ---\n";
const PASSAGE_DELIM: &str = "\n---\n";

/// The fully assembled input to one LLM call, plus the document ids that
/// contributed RAG passages — tracked out-of-band so they can be attached
/// to the emitted segments' metadata without parsing the prompt back out.
pub struct AssembledPrompt {
    pub system: String,
    pub messages: Vec<LlmMessage>,
    pub source_document_ids: Vec<String>,
}

/// Build a prompt in the fixed order: system prompt, rolling summary,
/// trailing history window, RAG passages, new user message.
///
/// `history` must already be the bounded trailing window (oldest first);
/// this function does not itself truncate it.
pub fn assemble(
    system_prompt: &str,
    summary: Option<&str>,
    history: &[StoredMessage],
    passages: &[Passage],
    user_message: &str,
) -> AssembledPrompt {
    let mut system = system_prompt.to_string();

    if let Some(summary) = summary {
        system.push_str(SUMMARY_PREFIX);
        system.push_str(summary);
    }

    let mut source_document_ids = Vec::new();
    if !passages.is_empty() {
        system.push_str(RAG_HEADER);
        for (i, passage) in passages.iter().enumerate() {
            if i > 0 {
                system.push_str(PASSAGE_DELIM);
            }
            system.push_str(&passage.text);
            if !source_document_ids.contains(&passage.document_id) {
                source_document_ids.push(passage.document_id.clone());
            }
        }
    }

    let mut messages: Vec<LlmMessage> = history
        .iter()
        .map(|m| LlmMessage {
            role: match m.role {
                MessageRole::User => LlmRole::User,
                MessageRole::Assistant => LlmRole::Assistant,
            },
            content: m.content.clone(),
        })
        .collect();

    messages.push(LlmMessage {
        role: LlmRole::User,
        content: user_message.to_string(),
    });

    AssembledPrompt {
        system,
        messages,
        source_document_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::types::{ChunkId, ConversationId, MessageId};
    use chrono::Utc;

    fn msg(role: MessageRole, content: &str) -> StoredMessage {
        StoredMessage {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            seq: 1,
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            emotion: None,
            sources: Vec::new(),
            chunk_id: None::<ChunkId>,
        }
    }

    #[test]
    fn assembles_in_documented_order_with_no_summary_or_rag() {
        let history = vec![msg(MessageRole::User, "hi"), msg(MessageRole::Assistant, "hello")];
        let prompt = assemble("You are helpful.", None, &history, &[], "how are you?");
        assert_eq!(prompt.system, "You are helpful.");
        assert_eq!(prompt.messages.len(), 3);
        assert_eq!(prompt.messages.last().unwrap().content, "how are you?");
        assert!(prompt.source_document_ids.is_empty());
    }

    #[test]
    fn summary_and_passages_appear_in_system_and_sources_are_deduped() {
        let passages = vec![
            Passage { text: "Paris is the capital of France".into(), document_id: "docA.txt".into(), score: 0.9 },
            Passage { text: "France borders Germany".into(), document_id: "docA.txt".into(), score: 0.7 },
        ];
        let prompt = assemble("System.", Some("Earlier they discussed travel."), &[], &passages, "capital of France?");
        assert!(prompt.system.contains("Earlier they discussed travel."));
        assert!(prompt.system.contains("Paris is the capital of France"));
        assert_eq!(prompt.source_document_ids, vec!["docA.txt".to_string()]);
    }
}
