//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required; every other section has defaults. See
//! `config/steps.example.toml` for a full example.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// What the ingestion driver does with a rejected row.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Record the rejection and keep going.
    #[default]
    Skip,
    /// Stop the run at the first rejection.
    Abort,
}

impl FromStr for OnError {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => bail!("Unknown on_error policy: '{}'. Use skip or abort.", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default)]
    pub batch_label: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            on_error: OnError::Skip,
            batch_label: None,
        }
    }
}

fn default_concurrency() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override for the HTTP providers.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_input_chars: default_max_input_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_input_chars() -> usize {
    8000
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    /// Default radius for area risk and `near` filters, in meters.
    #[serde(default = "default_near_radius_m")]
    pub near_radius_m: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            near_radius_m: default_near_radius_m(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}
fn default_near_radius_m() -> f64 {
    500.0
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
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;

    if config.ingest.concurrency == 0 {
        bail!("ingest.concurrency must be >= 1");
    }

    if config.retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.candidate_k_keyword < 1 || config.retrieval.candidate_k_vector < 1 {
        bail!("retrieval.candidate_k_keyword and candidate_k_vector must be >= 1");
    }
    if !(config.retrieval.near_radius_m.is_finite() && config.retrieval.near_radius_m > 0.0) {
        bail!("retrieval.near_radius_m must be > 0");
    }

    if config.embedding.max_input_chars == 0 {
        bail!("embedding.max_input_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // The local provider can infer dims from its model name.
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
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

    Ok(config)
}
