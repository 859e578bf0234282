//! Local inference via fastembed. Models download from Hugging Face on first
//! use and are cached; after that no network calls are made.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use safesteps_core::embedding::TextEmbedder;

use crate::config::EmbeddingConfig;

const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    max_input_chars: usize,
    model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        // Fail on unknown names before any download.
        to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or_else(|| default_dims(&model_name));

        Ok(Self {
            model_name,
            dims,
            max_input_chars: config.max_input_chars,
            model: Arc::new(Mutex::new(None)),
        })
    }
}

fn default_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        _ => 384,
    }
}

fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[async_trait]
impl TextEmbedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> Option<usize> {
        Some(self.max_input_chars)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let slot = self.model.clone();
        let model_name = self.model_name.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(
                    to_fastembed_model(&model_name)?,
                ))
                .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow!("local embedding model unavailable"))?;

            model
                .embed(vec![text], None)
                .map_err(|e| anyhow!("Local embedding failed: {}", e))?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("Local embedding returned no vectors"))
        })
        .await?
    }
}
