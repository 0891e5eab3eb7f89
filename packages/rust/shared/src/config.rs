//! Application configuration for DocRAG.
//!
//! User config lives at `~/.docrag/docrag.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocRagError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docrag.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docrag";

// ---------------------------------------------------------------------------
// Config structs (matching docrag.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crawl limits and retry policy.
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Embedding service settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Answer-generation LLM settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[crawl]` section.
///
/// Crawl scope is fixed to the root URL's host; the page cap and concurrency
/// are explicit values here rather than hidden constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Maximum pages fetched per crawl job (frontier cap).
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum concurrent fetches within one crawl job.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Minimum ms between requests within one job.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Maximum attempts for a transient fetch/embedding failure.
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
            rate_limit_ms: default_rate_limit(),
            fetch_timeout_secs: default_fetch_timeout(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }
}

fn default_max_pages() -> usize {
    200
}
fn default_concurrency() -> usize {
    4
}
fn default_rate_limit() -> u64 {
    100
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    250
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "http" (OpenAI-compatible endpoint) or "hash" (offline).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Base URL of the embedding API.
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Embedding model identifier.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Vector dimension produced by the model.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_embedding_provider() -> String {
    "http".into()
}
fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_dimension() -> usize {
    1536
}
fn default_batch_size() -> usize {
    32
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the chat-completions API.
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Model used for answer synthesis.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file ("~" expands to the home directory).
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.docrag/docrag.db".into()
}

impl StorageConfig {
    /// Resolve the database path, expanding a leading `~`.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            let home = dirs::home_dir()
                .ok_or_else(|| DocRagError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        } else {
            Ok(PathBuf::from(&self.db_path))
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docrag/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocRagError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docrag/docrag.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocRagError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocRagError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocRagError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocRagError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocRagError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
