use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Hard cap on a single inbound WS frame (bytes) before the connection is closed.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;
/// Close code used when a client never completes the handshake / auth step.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code used when a frame exceeds `MAX_PAYLOAD_BYTES`.
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;
/// Close code used for unexpected server-side failures.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Default LLM provider call timeout before the turn is aborted.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
/// Grace window given to in-flight turns during SIGTERM shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// Top-level config (chatd.toml + CHATD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            admin: AdminConfig::default(),
            engine: EngineConfig::default(),
            retrieval: RetrievalConfig::default(),
            database: DatabaseConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer/subprotocol/query/cookie token clients must present. `None`
    /// disables auth entirely — only sane for local development.
    #[serde(default = "default_chat_api_key")]
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: default_chat_api_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_api_key")]
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            api_key: default_admin_api_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `LLM_MAX_TOKENS` — max tokens requested per assistant turn.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// `MAX_HISTORY_MESSAGES` — size of the trailing raw-message window
    /// included verbatim in every prompt, in addition to the rolling summary.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// `SUMMARY_THRESHOLD` — once more than this many messages sit
    /// uncovered by the rolling summary, a background summarization runs.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,
    /// Recent messages never folded into the summary, regardless of
    /// threshold — keeps the freshest turns verbatim in the prompt.
    #[serde(default = "default_keep_tail")]
    pub keep_tail: usize,
    /// Admin-configured system prompt text, fetched fresh every turn.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_history_messages: default_max_history_messages(),
            summary_threshold: default_summary_threshold(),
            keep_tail: default_keep_tail(),
            system_prompt: default_system_prompt(),
            llm_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// `RAG_DOCS_FOLDER` — source documents re-ingested on startup and reload.
    #[serde(default = "default_docs_folder")]
    pub docs_folder: String,
    /// Minimum cosine similarity a passage must clear to be attributed.
    #[serde(default = "default_score_floor")]
    pub score_floor: f32,
    /// Number of top passages folded into the prompt per turn.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            docs_folder: default_docs_folder(),
            score_floor: default_score_floor(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `DATABASE_URL` — path to the conversation-store sqlite file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Sibling sqlite file for the retrieval index.
    #[serde(default = "default_retrieval_db_path")]
    pub retrieval_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            retrieval_path: default_retrieval_db_path(),
        }
    }
}

/// `LLM_PROVIDER` selects exactly one of these; its matching
/// `<PROVIDER>_API_KEY` env var (or TOML table) supplies credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiConfig>,
    pub ollama: Option<OllamaConfig>,
}

impl ProvidersConfig {
    /// The model id the engine puts on every `ChatRequest`. Picked from
    /// whichever provider is configured first in priority order — the
    /// same order [`crate::config::ProvidersConfig`]'s router is built in.
    pub fn primary_model(&self) -> Option<&str> {
        if let Some(c) = &self.anthropic {
            return Some(&c.model);
        }
        if let Some(c) = &self.openai {
            return Some(&c.model);
        }
        if let Some(c) = &self.ollama {
            return Some(&c.model);
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_chat_api_key() -> Option<String> {
    Some("change-me".to_string())
}
fn default_admin_api_key() -> String {
    "change-me-admin".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_max_history_messages() -> usize {
    20
}
fn default_summary_threshold() -> usize {
    30
}
fn default_keep_tail() -> usize {
    6
}
fn default_system_prompt() -> String {
    "You are a helpful conversational assistant.".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    DEFAULT_LLM_TIMEOUT_SECS
}
fn default_docs_folder() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chatd/docs", home)
}
fn default_score_floor() -> f32 {
    0.2
}
fn default_top_k() -> usize {
    4
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chatd/chatd.db", home)
}
fn default_retrieval_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chatd/retrieval.db", home)
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_anthropic_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3.1".to_string()
}

impl ChatConfig {
    /// Load config from a TOML file with `CHATD_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, then `CHATD_CONFIG`, then
    /// `~/.chatd/chatd.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CHATD_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: ChatConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHATD_").split("__"))
            .merge(Env::raw().only(&["CHAT_API_KEY", "ADMIN_API_KEY"]).map(|k| {
                match k.as_str() {
                    "CHAT_API_KEY" => "gateway.api_key".into(),
                    "ADMIN_API_KEY" => "admin.api_key".into(),
                    other => other.into(),
                }
            }))
            .merge(Env::raw().only(&["LLM_MAX_TOKENS"]).map(|_| "engine.max_tokens".into()))
            .merge(
                Env::raw()
                    .only(&["MAX_HISTORY_MESSAGES"])
                    .map(|_| "engine.max_history_messages".into()),
            )
            .merge(
                Env::raw()
                    .only(&["SUMMARY_THRESHOLD"])
                    .map(|_| "engine.summary_threshold".into()),
            )
            .merge(
                Env::raw()
                    .only(&["RAG_DOCS_FOLDER"])
                    .map(|_| "retrieval.docs_folder".into()),
            )
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.path".into()))
            .merge(Env::raw().only(&["HOST"]).map(|_| "gateway.host".into()))
            .merge(Env::raw().only(&["PORT"]).map(|_| "gateway.port".into()))
            .extract()
            .map_err(|e| crate::error::ChatError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        if self.engine.max_history_messages == 0 {
            return Err(crate::error::ChatError::Config(
                "engine.max_history_messages must be positive".to_string(),
            ));
        }
        if self.engine.summary_threshold == 0 {
            return Err(crate::error::ChatError::Config(
                "engine.summary_threshold must be positive".to_string(),
            ));
        }
        let has_provider = self.providers.anthropic.is_some()
            || self.providers.openai.is_some()
            || self.providers.ollama.is_some();
        if !has_provider {
            return Err(crate::error::ChatError::Config(
                "at least one LLM provider must be configured".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chatd/chatd.toml", home)
}
