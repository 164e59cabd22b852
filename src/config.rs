//! TOML configuration with environment overrides.
//!
//! Every section and field has a default, so an absent config file yields a
//! working service ([`Config::minimal`]). Secrets are never read from the
//! file: API keys come from `GOOGLE_API_KEY` / `OPENAI_API_KEY`, and the
//! listening port may be overridden with `PORT`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// SQLite file holding the embedding index.
    #[serde(default = "default_index_path")]
    pub index: PathBuf,
    /// Directory with one `<username>.json` file per user.
    #[serde(default = "default_users_dir")]
    pub users_dir: PathBuf,
    /// Root of the PDF corpus scanned on first start.
    #[serde(default = "default_pdf_dir")]
    pub pdf_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            index: default_index_path(),
            users_dir: default_users_dir(),
            pdf_dir: default_pdf_dir(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("db/tutor_index/index.sqlite")
}
fn default_users_dir() -> PathBuf {
    PathBuf::from("user_data")
}
fn default_pdf_dir() -> PathBuf {
    PathBuf::from("pdf_data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of passages handed to the answer prompt.
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway, test server).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Filled from the environment by [`Config::apply_env`], never from TOML.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
            api_key: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "gemini".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_output_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: 0.0,
            max_tokens: default_output_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout(),
            api_key: None,
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_output_tokens() -> u32 {
    256
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5173
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Cap on the persisted transcript per user.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Messages of context the interactive console sends with each question.
    #[serde(default = "default_console_window")]
    pub console_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            console_window: default_console_window(),
        }
    }
}

fn default_max_entries() -> usize {
    50
}
fn default_console_window() -> usize {
    20
}

impl Config {
    /// All defaults, no file. Used when the config file does not exist.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Apply `PORT` and provider API keys from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        let port = std::env::var("PORT").or_else(|_| std::env::var("port"));
        if let Ok(port) = port {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value: '{}'", port))?;
        }

        if self.embedding.api_key.is_none() {
            self.embedding.api_key = api_key_for(&self.embedding.provider);
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = api_key_for(&self.llm.provider);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            anyhow::bail!("chunking.max_tokens must be > 0");
        }
        if self.retrieval.k < 1 {
            anyhow::bail!("retrieval.k must be >= 1");
        }
        if self.ingest.workers < 1 {
            anyhow::bail!("ingest.workers must be >= 1");
        }
        if self.embedding.batch_size < 1 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }
        if self.history.max_entries < 1 {
            anyhow::bail!("history.max_entries must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "gemini" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be gemini, openai, ollama, or disabled.",
                other
            ),
        }
        if matches!(self.embedding.provider.as_str(), "openai" | "ollama")
            && self.embedding.model.is_none()
        {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            );
        }

        match self.llm.provider.as_str() {
            "gemini" | "openai" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be gemini or openai.",
                other
            ),
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
        }
        Ok(())
    }
}

fn api_key_for(provider: &str) -> Option<String> {
    let var = match provider {
        "gemini" => "GOOGLE_API_KEY",
        "openai" => "OPENAI_API_KEY",
        _ => return None,
    };
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

/// Parse and validate a config file. Environment overrides are not applied.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load the config from `path`, falling back to defaults when the file does
/// not exist, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::minimal()
    };
    config.apply_env()?;
    Ok(config)
}
