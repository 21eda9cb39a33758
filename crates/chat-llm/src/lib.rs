pub mod anthropic;
pub mod anthropic_stream;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod router;
pub mod stream;

pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role};
pub use router::{ProviderRouter, ProviderSlot};
pub use stream::StreamEvent;

use anthropic::AnthropicProvider;
use chat_core::config::ProvidersConfig;
use ollama::OllamaProvider;
use openai::OpenAiProvider;

/// Build a [`ProviderRouter`] from the configured provider table. Providers
/// are added in a fixed priority order (anthropic, openai, ollama) so a
/// deployment with more than one configured falls over between them rather
/// than picking arbitrarily.
pub fn build_router(providers: &ProvidersConfig) -> Result<ProviderRouter, chat_core::ChatError> {
    let mut slots = Vec::new();

    if let Some(cfg) = &providers.anthropic {
        slots.push(ProviderSlot::new(
            Box::new(AnthropicProvider::new(cfg.api_key.clone(), Some(cfg.base_url.clone()))),
            2,
        ));
    }
    if let Some(cfg) = &providers.openai {
        slots.push(ProviderSlot::new(
            Box::new(OpenAiProvider::new(cfg.api_key.clone(), Some(cfg.base_url.clone()))),
            2,
        ));
    }
    if let Some(cfg) = &providers.ollama {
        slots.push(ProviderSlot::new(
            Box::new(OllamaProvider::new(Some(cfg.base_url.clone()))),
            1,
        ));
    }

    if slots.is_empty() {
        return Err(chat_core::ChatError::Config(
            "no LLM provider configured".to_string(),
        ));
    }

    Ok(ProviderRouter::new(slots))
}
