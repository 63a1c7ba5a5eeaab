//! Index construction and pipeline wiring.
//!
//! Coordinates the startup flow: corpus → segmentation → embedding →
//! in-memory index, then pairs the index with the configured reranker and
//! generator. Everything here runs once per process; the resulting
//! [`AnsweringPipeline`] is shared by every question in the run.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use vignette_rag_core::chunk::Segmenter;
use vignette_rag_core::embedding::EmbeddingProvider;
use vignette_rag_core::index::EmbeddingIndex;
use vignette_rag_core::models::Chunk;
use vignette_rag_core::pipeline::{AnsweringPipeline, BaselineAnswerer};
use vignette_rag_core::retrieve::Retriever;

use crate::config::{Config, Credentials};
use crate::corpus::{load_corpus, Corpus};
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::rerank::create_reranker;

/// Load the corpus and cut it into chunks without embedding anything.
pub fn segment_corpus(config: &Config) -> Result<(Corpus, Vec<Chunk>)> {
    let corpus = load_corpus(&config.corpus)?;
    let segmenter = Segmenter::from_tokens(
        config.chunking.max_tokens,
        config.chunking.overlap_tokens,
    )?;
    let chunks = segmenter.segment_all(&corpus.documents);
    Ok((corpus, chunks))
}

/// Embed the corpus and build the in-memory index.
pub async fn build_index(
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    progress: &dyn ProgressReporter,
) -> Result<EmbeddingIndex> {
    let (corpus, chunks) = segment_corpus(config)?;
    if corpus.documents.is_empty() {
        bail!(
            "no documents could be loaded from {} ({} files skipped)",
            config.corpus.root.display(),
            corpus.skipped.len()
        );
    }

    let chunk_count = chunks.len();
    let index = EmbeddingIndex::build(embedder, chunks, config.embedding.batch_size)
        .await
        .context("Failed to build embedding index")?;

    info!(
        documents = corpus.documents.len(),
        skipped = corpus.skipped.len(),
        chunks = chunk_count,
        model = index.model_name(),
        "index ready"
    );
    progress.report(ProgressEvent::Indexed {
        documents: corpus.documents.len(),
        chunks: chunk_count,
    });
    Ok(index)
}

/// Build the full retrieval-augmented pipeline from config.
pub async fn build_pipeline(
    config: &Config,
    credentials: &Credentials,
    progress: &dyn ProgressReporter,
) -> Result<AnsweringPipeline> {
    // Construct every provider before the expensive embedding pass so a
    // missing key fails fast.
    let embedder = create_embedder(&config.embedding, credentials)?;
    let reranker = create_reranker(&config.rerank, credentials)?;
    let generator = create_generator(&config.generation, credentials)?;
    let template = config.prompt.template()?;

    let index = build_index(config, embedder.as_ref(), progress).await?;
    let retriever = Retriever::new(Arc::new(index), embedder)?;
    Ok(AnsweringPipeline::new(
        retriever,
        reranker,
        generator,
        template,
        config.pipeline_settings(),
    ))
}

/// Generation-only answerer for baseline runs.
pub fn build_baseline(config: &Config, credentials: &Credentials) -> Result<BaselineAnswerer> {
    let generator = create_generator(&config.generation, credentials)?;
    Ok(BaselineAnswerer::new(generator, config.prompt.system.clone()))
}
