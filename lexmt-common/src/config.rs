//! Runtime configuration loading and resolution
//!
//! Settings resolve with Environment -> TOML -> default priority. The
//! resolved [`RuntimeConfig`] is constructed once at startup and passed by
//! reference afterwards; nothing re-reads the environment mid-run.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Env var prefix used by all lexmt binaries
const ENV_PREFIX: &str = "LEXMT";

/// Raw TOML configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Chat/embedding API base URL (OpenAI-compatible)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_model: Option<String>,
    /// Fixed output width of the embedding model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dim: Option<usize>,
    /// Vector collection server base URL; optional, lookup degrades without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_db_url: Option<String>,
    /// External scoring service for COMET / BERTScore; optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    /// Termbase SQLite path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_db: Option<PathBuf>,
    /// TM lexical index path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tm_index: Option<PathBuf>,
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embed_model: String,
    pub embedding_dim: usize,
    pub vector_db_url: Option<String>,
    pub scoring_url: Option<String>,
    pub llm_timeout_secs: u64,
    pub llm_max_retries: u32,
    pub max_concurrent: usize,
    pub term_db: PathBuf,
    pub tm_index: PathBuf,
}

impl RuntimeConfig {
    /// Resolve configuration from an optional TOML file plus environment.
    ///
    /// Required: `api_key`. Everything else has a workable default. Returns
    /// `Error::Config` (exit code 2 at the CLI boundary) when a required key
    /// is missing or a value fails to parse.
    pub fn resolve(toml_path: Option<&Path>) -> Result<RuntimeConfig> {
        let file = match toml_path {
            Some(path) => Some(read_toml_config(path)?),
            None => match default_config_file() {
                Some(path) if path.exists() => Some(read_toml_config(&path)?),
                _ => None,
            },
        };
        let file = file.unwrap_or_default();

        let api_key = resolve_string("API_KEY", file.api_key.clone())
            .ok_or_else(|| {
                Error::Config(format!(
                    "API key not configured. Set {ENV_PREFIX}_API_KEY or api_key in the config file"
                ))
            })?;

        let embedding_dim = match std::env::var(format!("{ENV_PREFIX}_EMBEDDING_DIM")) {
            Ok(raw) => raw
                .parse::<usize>()
                .map_err(|e| Error::Config(format!("invalid {ENV_PREFIX}_EMBEDDING_DIM: {e}")))?,
            Err(_) => file.embedding_dim.unwrap_or(1536),
        };

        let config = RuntimeConfig {
            api_base_url: resolve_string("BASE_URL", file.api_base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            chat_model: resolve_string("CHAT_MODEL", file.chat_model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            embed_model: resolve_string("EMBED_MODEL", file.embed_model)
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dim,
            vector_db_url: resolve_string("VECTOR_DB_URL", file.vector_db_url),
            scoring_url: resolve_string("SCORING_URL", file.scoring_url),
            llm_timeout_secs: file.llm_timeout_secs.unwrap_or(300),
            llm_max_retries: file.llm_max_retries.unwrap_or(3),
            max_concurrent: file.max_concurrent.unwrap_or(10),
            term_db: file.term_db.unwrap_or_else(|| PathBuf::from("terms.db")),
            tm_index: file
                .tm_index
                .unwrap_or_else(|| PathBuf::from("tm_index.json")),
        };

        if config.max_concurrent == 0 {
            return Err(Error::Config("max_concurrent must be >= 1".to_string()));
        }
        if config.embedding_dim == 0 {
            return Err(Error::Config("embedding_dim must be >= 1".to_string()));
        }

        info!(
            base_url = %config.api_base_url,
            chat_model = %config.chat_model,
            embed_model = %config.embed_model,
            embedding_dim = config.embedding_dim,
            "Runtime configuration resolved"
        );

        Ok(config)
    }
}

/// Resolve a string setting with Environment -> TOML priority, warning when
/// both sources carry a value.
fn resolve_string(key: &str, toml_value: Option<String>) -> Option<String> {
    let env_value = std::env::var(format!("{ENV_PREFIX}_{key}"))
        .ok()
        .filter(|v| !v.trim().is_empty());
    let toml_value = toml_value.filter(|v| !v.trim().is_empty());

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            setting = key,
            "Setting found in both environment and TOML; using environment"
        );
    }

    env_value.or(toml_value)
}

/// Read and parse a TOML configuration file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("read config {} failed: {e}", path.display())))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("parse config {} failed: {e}", path.display())))
}

/// Write a TOML configuration file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("serialize config failed: {e}")))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Platform default config file: `<config dir>/lexmt/lexmt.toml`
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lexmt").join("lexmt.toml"))
}
