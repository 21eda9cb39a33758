use std::sync::Arc;

use chat_core::types::ConversationId;
use chat_llm::{ChatRequest, LlmProvider, Message as LlmMessage, Role as LlmRole};
use chat_store::ConversationStore;
use tracing::{debug, warn};

const SUMMARIZER_SYSTEM_PROMPT: &str =
    "Condense the conversation so far into a short, factual summary a future turn can use as context. \
     Preserve names, decisions, and commitments. Do not address the user directly.";

/// Check whether `conv_id` has crossed the summarization threshold and, if
/// so, spawn a background task to produce a new rolling summary.
///
/// Returns immediately either way — summarization never blocks the turn
/// that triggered it.
pub fn maybe_trigger(
    store: Arc<ConversationStore>,
    llm: Arc<dyn LlmProvider>,
    conv_id: ConversationId,
    model: String,
    summary_threshold: usize,
    keep_tail: usize,
) {
    let uncovered = match store.uncovered_count(&conv_id) {
        Ok(n) => n,
        Err(e) => {
            warn!(conversation_id = %conv_id, error = %e, "failed to read uncovered count");
            return;
        }
    };
    if uncovered <= summary_threshold {
        return;
    }

    tokio::spawn(async move {
        if let Err(e) = run(&store, llm.as_ref(), &conv_id, &model, keep_tail).await {
            warn!(conversation_id = %conv_id, error = %e, "background summarization failed");
        }
    });
}

async fn run(
    store: &ConversationStore,
    llm: &dyn LlmProvider,
    conv_id: &ConversationId,
    model: &str,
    keep_tail: usize,
) -> Result<(), crate::error::EngineError> {
    // Per-conversation lock: prevents two summarization tasks for the same
    // conversation racing each other's update_summary call.
    let lock = store.conversation_lock(conv_id);
    let _guard = lock.lock().await;

    let conversation = store.get(conv_id)?;
    let messages = store.load_all(conv_id)?;
    let Some(total_seq) = messages.last().map(|m| m.seq) else {
        return Ok(());
    };

    let new_covered = total_seq
        .saturating_sub(keep_tail as i64)
        .max(conversation.summary_covered_upto_seq);
    if new_covered <= conversation.summary_covered_upto_seq {
        debug!(conversation_id = %conv_id, "nothing new to fold into summary, skipping");
        return Ok(());
    }

    let to_fold: Vec<_> = messages
        .iter()
        .filter(|m| m.seq > conversation.summary_covered_upto_seq && m.seq <= new_covered)
        .collect();

    let mut transcript = String::new();
    if let Some(prev) = &conversation.summary {
        transcript.push_str("Existing summary:\n");
        transcript.push_str(prev);
        transcript.push_str("\n\n");
    }
    transcript.push_str("New messages to fold in:\n");
    for m in &to_fold {
        transcript.push_str(&format!("{}: {}\n", m.role, m.content));
    }

    let req = ChatRequest {
        model: model.to_string(),
        system: SUMMARIZER_SYSTEM_PROMPT.to_string(),
        messages: vec![LlmMessage { role: LlmRole::User, content: transcript }],
        max_tokens: 512,
        stream: false,
    };

    let resp = llm.send(&req).await?;
    store.update_summary(conv_id, resp.content.trim(), new_covered)?;
    debug!(conversation_id = %conv_id, covered_upto_seq = new_covered, "summary updated");
    Ok(())
}
