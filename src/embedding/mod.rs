//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`OpenAIEmbedder`]** — `POST /v1/embeddings`, requesting the configured
//!   `dimensions` so the vectors match `embedding.dims`.
//! - **[`OllamaEmbedder`]** — a local Ollama instance's `/api/embed` endpoint.
//! - **[`LocalEmbedder`]** — in-process inference via fastembed (feature
//!   `local-models`); no network calls after the model download.
//!
//! Use [`create_embedder`] to build the provider named in `[embedding]`.
//! HTTP providers retry transient failures through [`crate::retry`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use vignette_rag_core::embedding::EmbeddingProvider;
use vignette_rag_core::ServiceError;

use crate::config::{Credentials, EmbeddingConfig};
use crate::retry::{send_json, with_retry, RetryPolicy};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, credentials: &Credentials) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: credentials.openai()?.to_string(),
            model,
            dims,
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        });
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let response: OpenAIEmbeddingResponse = with_retry(&self.retry, || {
            send_json(
                "openai-embeddings",
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body),
            )
        })
        .await?;
        order_by_index(response.data, texts.len())
    }
}

/// Put `data[]` back in request order using each item's `index`.
fn order_by_index(
    mut data: Vec<OpenAIEmbeddingItem>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ServiceError> {
    data.sort_by_key(|item| item.index);
    let in_range = data.iter().enumerate().all(|(i, item)| item.index == i);
    if data.len() != expected || !in_range {
        return Err(ServiceError::malformed(
            "openai-embeddings",
            format!(
                "expected {} embeddings indexed 0..{}, got {}",
                expected,
                expected,
                data.len()
            ),
        ));
    }
    Ok(data.into_iter().map(|item| item.embedding).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
            model,
            dims,
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let response: OllamaEmbedResponse = with_retry(&self.retry, || {
            send_json("ollama", self.client.post(&url).json(&body))
        })
        .await?;
        Ok(response.embeddings)
    }
}

// ============ Local (fastembed) ============

/// In-process embedding model. The model is loaded on first use and kept
/// for the rest of the run.
#[cfg(feature = "local-models")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    model: fastembed::EmbeddingModel,
    batch_size: usize,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-models")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-small-en-v1.5".to_string());
        let (model, native_dims) = local_model(&model_name)?;
        let dims = config.dims.unwrap_or(native_dims);
        if dims != native_dims {
            bail!(
                "embedding.dims = {} but local model '{}' produces {}-dimensional vectors",
                dims,
                model_name,
                native_dims
            );
        }
        Ok(Self {
            model_name,
            dims,
            model,
            batch_size: config.batch_size,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-models")]
fn local_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    Ok(match name {
        "all-minilm-l6-v2" => (M::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => (M::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (M::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (M::BGELargeENV15, 1024),
        "nomic-embed-text-v1.5" => (M::NomicEmbedTextV15, 768),
        "multilingual-e5-large" => (M::MultilingualE5Large, 1024),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-large",
            other
        ),
    })
}

#[cfg(feature = "local-models")]
#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let name = self.model_name.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| ServiceError::permanent(&name, "local model lock poisoned"))?;
            if guard.is_none() {
                let m = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    ServiceError::permanent(&name, format!("failed to load model: {}", e))
                })?;
                *guard = Some(m);
            }
            let Some(m) = guard.as_mut() else {
                return Err(ServiceError::permanent(&name, "local model not loaded"));
            };
            m.embed(texts, Some(batch_size))
                .map_err(|e| ServiceError::permanent(&name, e.to_string()))
        })
        .await
        .map_err(|e| ServiceError::permanent(&self.model_name, e.to_string()))?
    }
}

/// Create the [`EmbeddingProvider`] named by `embedding.provider`.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-models`) |
pub fn create_embedder(
    config: &EmbeddingConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config, credentials)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local embedding provider requires --features local-models"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
