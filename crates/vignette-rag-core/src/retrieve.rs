//! First retrieval stage: embed the question and pull the nearest chunks.
//!
//! The retriever is the cheap, high-recall half of the two-stage design. It
//! deliberately oversamples (`top_k` well above the number of chunks that
//! will reach the prompt) so the filter and reranker have room to work.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{IndexError, PipelineError};
use crate::index::EmbeddingIndex;
use crate::models::ScoredCandidate;

/// Embeds questions with the index's own provider and queries the index.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<EmbeddingIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    /// Pair an index with the provider that embeds queries.
    ///
    /// # Errors
    ///
    /// Fails if the provider is not the model the index was built with, or
    /// if its dimensionality differs.
    pub fn new(
        index: Arc<EmbeddingIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IndexError> {
        if embedder.model_name() != index.model_name() {
            return Err(IndexError::ModelMismatch {
                index_model: index.model_name().to_string(),
                query_model: embedder.model_name().to_string(),
            });
        }
        if embedder.dims() != index.dims() {
            return Err(IndexError::QueryDimensionMismatch {
                expected: index.dims(),
                actual: embedder.dims(),
            });
        }
        Ok(Self { index, embedder })
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Return up to `top_k` candidates, highest similarity first.
    ///
    /// Ties keep chunk insertion order.
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredCandidate>, PipelineError> {
        let query_vec = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(PipelineError::Retrieval)?;
        let hits = self.index.query(&query_vec, top_k)?;
        debug!(
            top_k,
            returned = hits.len(),
            best = hits.first().map(|(_, s)| *s),
            "retrieved candidates"
        );
        Ok(hits
            .into_iter()
            .map(|(chunk, similarity)| ScoredCandidate::new(chunk, similarity))
            .collect())
    }
}
