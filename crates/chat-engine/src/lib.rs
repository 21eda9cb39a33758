pub mod engine;
pub mod error;
pub mod prompt;
pub mod segmenter;
pub mod summarizer;

pub use engine::{ConversationEngine, EngineConfig, SystemPromptCell};
pub use error::EngineError;
