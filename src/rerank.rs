//! Cross-encoder rerank providers.
//!
//! - **[`VoyageReranker`]** — `POST https://api.voyageai.com/v1/rerank`.
//! - **[`LocalReranker`]** — fastembed `TextRerank` (feature `local-models`).
//!
//! Both return scores in input order. Backends that answer in relevance
//! order tag each result with the input `index`, which is used to put the
//! scores back in place; a missing or duplicated index is a malformed
//! response.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vignette_rag_core::rerank::RerankProvider;
use vignette_rag_core::ServiceError;

use crate::config::{Credentials, RerankConfig};
use crate::retry::{send_json, with_retry, RetryPolicy};

const VOYAGE_URL: &str = "https://api.voyageai.com";

/// Scatter `(index, score)` pairs into input order.
fn scores_in_input_order(
    service: &str,
    results: impl IntoIterator<Item = (usize, f32)>,
    expected: usize,
) -> Result<Vec<f32>, ServiceError> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for (index, score) in results {
        match scores.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(score),
            Some(_) => {
                return Err(ServiceError::malformed(
                    service,
                    format!("duplicate result for document {}", index),
                ))
            }
            None => {
                return Err(ServiceError::malformed(
                    service,
                    format!("result index {} out of range (0..{})", index, expected),
                ))
            }
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            s.ok_or_else(|| {
                ServiceError::malformed(service, format!("no score for document {}", i))
            })
        })
        .collect()
}

// ============ Voyage ============

pub struct VoyageReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct VoyageRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
    return_documents: bool,
}

#[derive(Debug, Deserialize)]
struct VoyageResponse {
    data: Vec<VoyageResult>,
}

#[derive(Debug, Deserialize)]
struct VoyageResult {
    index: usize,
    relevance_score: f32,
}

impl VoyageReranker {
    pub fn new(config: &RerankConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .context("Failed to build HTTP client")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| VOYAGE_URL.to_string()),
            api_key: credentials.voyage()?.to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "rerank-2".to_string()),
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

#[async_trait]
impl RerankProvider for VoyageReranker {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, question: &str, documents: &[String]) -> Result<Vec<f32>, ServiceError> {
        let body = VoyageRequest {
            query: question,
            documents,
            model: &self.model,
            return_documents: false,
        };
        let url = format!("{}/v1/rerank", self.base_url.trim_end_matches('/'));
        let response: VoyageResponse = with_retry(&self.retry, || {
            send_json(
                "voyage-rerank",
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body),
            )
        })
        .await?;
        scores_in_input_order(
            "voyage-rerank",
            response
                .data
                .into_iter()
                .map(|r| (r.index, r.relevance_score)),
            documents.len(),
        )
    }
}

// ============ Local (fastembed) ============

/// In-process cross-encoder, loaded on first use.
#[cfg(feature = "local-models")]
pub struct LocalReranker {
    model_name: String,
    model: fastembed::RerankerModel,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextRerank>>>,
}

#[cfg(feature = "local-models")]
impl LocalReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-reranker-base".to_string());
        let model = match model_name.as_str() {
            "bge-reranker-base" => fastembed::RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" => fastembed::RerankerModel::BGERerankerV2M3,
            "jina-reranker-v1-turbo-en" => fastembed::RerankerModel::JINARerankerV1TurboEn,
            other => bail!(
                "Unknown local rerank model: '{}'. Supported models: \
                 bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
                other
            ),
        };
        Ok(Self {
            model_name,
            model,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl RerankProvider for LocalReranker {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn score(&self, question: &str, documents: &[String]) -> Result<Vec<f32>, ServiceError> {
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let name = self.model_name.clone();
        let question = question.to_string();
        let documents = documents.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| ServiceError::permanent(&name, "local model lock poisoned"))?;
            if guard.is_none() {
                let m = fastembed::TextRerank::try_new(
                    fastembed::RerankInitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    ServiceError::permanent(&name, format!("failed to load model: {}", e))
                })?;
                *guard = Some(m);
            }
            let Some(m) = guard.as_mut() else {
                return Err(ServiceError::permanent(&name, "local model not loaded"));
            };
            let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
            let results = m
                .rerank(question.as_str(), docs, false, None)
                .map_err(|e| ServiceError::permanent(&name, e.to_string()))?;
            scores_in_input_order(
                &name,
                results.into_iter().map(|r| (r.index, r.score)),
                documents.len(),
            )
        })
        .await
        .map_err(|e| ServiceError::permanent(&self.model_name, e.to_string()))?
    }
}

/// Create the [`RerankProvider`] named by `rerank.provider`.
pub fn create_reranker(
    config: &RerankConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn RerankProvider>> {
    match config.provider.as_str() {
        "voyage" => Ok(Arc::new(VoyageReranker::new(config, credentials)?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(LocalReranker::new(config)?)),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local rerank provider requires --features local-models"),
        other => bail!("Unknown rerank provider: {}", other),
    }
}
