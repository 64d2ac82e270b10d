//! Configuration parsing and validation.
//!
//! Chat Archive is configured by a TOML file (default
//! `./config/chatarc.toml`). Every section except `[db]` is optional and
//! falls back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/chatarc.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [retrieval]
//! thread_filter = "after_take"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use chat_archive_core::pipeline::{PipelineParams, DEFAULT_BATCH_LIMIT, DEFAULT_MAX_CHARS};
use chat_archive_core::search::{RetrievalParams, ThreadFilter};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub max_retries: u32,
    /// Per-request timeout; unset means wait indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            max_chars: default_max_chars(),
            max_retries: 0,
            timeout_secs: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn pipeline_params(&self) -> PipelineParams {
        PipelineParams {
            max_chars: self.max_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: usize,
    #[serde(default = "default_keyword_scan_window")]
    pub keyword_scan_window: usize,
    #[serde(default = "default_semantic_limit")]
    pub semantic_limit: usize,
    #[serde(default = "default_semantic_overfetch")]
    pub semantic_overfetch: usize,
    #[serde(default = "default_embed_batch_limit")]
    pub embed_batch_limit: usize,
    #[serde(default)]
    pub thread_filter: ThreadFilter,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            list_limit: default_list_limit(),
            keyword_limit: default_keyword_limit(),
            keyword_scan_window: default_keyword_scan_window(),
            semantic_limit: default_semantic_limit(),
            semantic_overfetch: default_semantic_overfetch(),
            embed_batch_limit: default_embed_batch_limit(),
            thread_filter: ThreadFilter::default(),
        }
    }
}

fn default_list_limit() -> usize {
    50
}
fn default_keyword_limit() -> usize {
    20
}
fn default_keyword_scan_window() -> usize {
    1000
}
fn default_semantic_limit() -> usize {
    10
}
fn default_semantic_overfetch() -> usize {
    3
}
fn default_embed_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            list_limit: self.list_limit,
            keyword_limit: self.keyword_limit,
            keyword_scan_window: self.keyword_scan_window,
            semantic_limit: self.semantic_limit,
            semantic_overfetch: self.semantic_overfetch,
            thread_filter: self.thread_filter,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    for (name, value) in [
        ("list_limit", r.list_limit),
        ("keyword_limit", r.keyword_limit),
        ("keyword_scan_window", r.keyword_scan_window),
        ("semantic_limit", r.semantic_limit),
        ("semantic_overfetch", r.semantic_overfetch),
        ("embed_batch_limit", r.embed_batch_limit),
    ] {
        if value < 1 {
            bail!("retrieval.{} must be >= 1", name);
        }
    }

    if config.embedding.max_chars < 1 {
        bail!("embedding.max_chars must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}
