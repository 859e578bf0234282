//! Embedding providers implementing [`TextEmbedder`].
//!
//! - **[`DisabledEmbedder`]**: zero-length vectors; records are still stored
//!   for keyword search and area risk.
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings` with retry and backoff.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: fastembed, behind the `local-embeddings-fastembed` feature.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use safesteps::config::EmbeddingConfig;
//! # use safesteps::embedding::{create_embedder, TextEmbedder};
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! Retries live here, in the transport, never in the record transformer:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, ... (capped at 2^5)

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use safesteps_core::embedding::TextEmbedder;

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Create the [`TextEmbedder`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn TextEmbedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// Produces empty vectors without any network call.
pub struct DisabledEmbedder;

#[async_trait]
impl TextEmbedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}

// ============ Shared HTTP transport ============

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

fn required_model(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .filter(|d| *d > 0)
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

/// Send the request built by `request`, retrying 429, 5xx, and connection errors.
async fn post_json_with_retry(
    request: impl Fn() -> reqwest::RequestBuilder,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("{} returned invalid JSON", label));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error: {}", label, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
}

fn json_to_vec(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", what))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid {} response: non-numeric component", what))
        })
        .collect()
}

// ============ OpenAI ============

/// Embedding provider using the OpenAI API.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    max_input_chars: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let (model, dims) = required_model(config, "OpenAI")?;
        Ok(Self {
            client: http_client(config)?,
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key: api_key.into(),
            max_retries: config.max_retries,
            max_input_chars: config.max_input_chars,
        })
    }
}

#[async_trait]
impl TextEmbedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> Option<usize> {
        Some(self.max_input_chars)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let endpoint = format!("{}/v1/embeddings", self.url.trim_end_matches('/'));

        let json = post_json_with_retry(
            || {
                self.client
                    .post(&endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
            "OpenAI",
        )
        .await?;

        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data[0].embedding"))?;
    json_to_vec(embedding, "OpenAI")
}

// ============ Ollama ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on `embedding.url` (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    max_input_chars: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "Ollama")?;
        Ok(Self {
            client: http_client(config)?,
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
            max_input_chars: config.max_input_chars,
        })
    }
}

#[async_trait]
impl TextEmbedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> Option<usize> {
        Some(self.max_input_chars)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));

        let json = post_json_with_retry(
            || self.client.post(&endpoint).json(&body),
            self.max_retries,
            "Ollama",
        )
        .await?;

        parse_ollama_response(&json)
    }
}

/// Extract `embeddings[0]` from an Ollama `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;
    json_to_vec(embedding, "Ollama")
}
