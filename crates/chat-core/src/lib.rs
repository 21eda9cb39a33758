pub mod config;
pub mod error;
pub mod types;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
