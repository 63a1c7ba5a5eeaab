//! Second retrieval stage: cross-encoder reranking.
//!
//! Vector similarity compares two independently computed embeddings. A
//! cross-encoder instead reads the question and a chunk together and emits a
//! relevance score, which is more precise but far more expensive, so it only
//! runs on the small candidate pool that survived retrieval and filtering.
//!
//! Rerank scores are not comparable to similarity scores; they only order
//! candidates within one query.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PipelineError, ServiceError};
use crate::index::EmbeddingIndex;
use crate::models::ScoredCandidate;

/// A joint (question, passage) relevance scorer.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-reranker-base"`).
    fn model_name(&self) -> &str;

    /// Score every document against `question`.
    ///
    /// Must return exactly one score per document, in input order. Higher
    /// means more relevant.
    async fn score(&self, question: &str, documents: &[String]) -> Result<Vec<f32>, ServiceError>;
}

/// Rescore `candidates` and keep the best `top_n`.
///
/// Returns exactly `min(top_n, candidates.len())` candidates ordered by
/// descending rerank score. Ties fall back to similarity, then insertion
/// order. Empty input (or `top_n == 0`) returns early without calling the
/// provider.
pub async fn rerank(
    provider: &dyn RerankProvider,
    index: &EmbeddingIndex,
    question: &str,
    candidates: Vec<ScoredCandidate>,
    top_n: usize,
) -> Result<Vec<ScoredCandidate>, PipelineError> {
    if candidates.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let documents: Vec<String> = candidates
        .iter()
        .map(|c| {
            index
                .chunk(c.chunk)
                .map(|chunk| chunk.text.clone())
                .unwrap_or_default()
        })
        .collect();

    let scores = provider
        .score(question, &documents)
        .await
        .map_err(PipelineError::Rerank)?;
    if scores.len() != candidates.len() {
        return Err(PipelineError::Rerank(ServiceError::malformed(
            provider.model_name(),
            format!(
                "expected {} scores, got {}",
                candidates.len(),
                scores.len()
            ),
        )));
    }

    let mut ranked: Vec<ScoredCandidate> = candidates
        .into_iter()
        .zip(scores)
        .map(|(mut c, s)| {
            c.rerank_score = Some(sort_key(s));
            c
        })
        .collect();

    ranked.sort_by(|a, b| {
        let ra = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
        let rb = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
        rb.total_cmp(&ra)
            .then(sort_key(b.similarity).total_cmp(&sort_key(a.similarity)))
            .then(a.chunk.cmp(&b.chunk))
    });
    ranked.truncate(top_n);

    debug!(
        model = provider.model_name(),
        kept = ranked.len(),
        best = ranked.first().and_then(|c| c.rerank_score),
        "reranked candidates"
    );
    Ok(ranked)
}

/// NaN sorts last; -0.0 and 0.0 compare equal.
fn sort_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score + 0.0
    }
}
