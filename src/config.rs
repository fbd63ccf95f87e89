//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;

/// Nubbybot configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (holds the SQLite database).
    pub data_dir: std::path::PathBuf,

    /// Completion provider configuration.
    pub llm: LlmConfig,
}

/// Completion provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Anthropic API key.
    pub api_key: String,

    /// Base URL for the messages API.
    pub base_url: String,

    /// Model used for answering questions.
    pub query_model: String,

    /// Cheap model used for follow-up continuation checks.
    pub classifier_model: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var("NUBBYBOT_DATA_DIR") {
            Ok(dir) => std::path::PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .map(|d| d.join("nubbybot"))
                .unwrap_or_else(|| std::path::PathBuf::from("./data")),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingKey("ANTHROPIC_API_KEY".into()))?;

        let llm = LlmConfig {
            api_key,
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".into()),
            query_model: std::env::var("NUBBYBOT_QUERY_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".into()),
            classifier_model: std::env::var("NUBBYBOT_CLASSIFIER_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".into()),
        };

        if llm.api_key.is_empty() {
            return Err(ConfigError::Invalid("ANTHROPIC_API_KEY is empty".into()).into());
        }

        Ok(Self { data_dir, llm })
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> std::path::PathBuf {
        self.data_dir.join("nubbybot.db")
    }
}
