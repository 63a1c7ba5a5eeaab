//! # vignette-rag core
//!
//! Runtime-agnostic logic for retrieval-augmented answering: data models,
//! segmentation, the in-memory vector index, retrieval, similarity
//! filtering, cross-encoder reranking, prompt assembly, and the per-question
//! answering pipeline.
//!
//! This crate contains no tokio, HTTP, or filesystem I/O. External services
//! (embedding, reranking, generation) are reached through the traits in
//! [`embedding`], [`rerank`], and [`pipeline`]; the `vignette-rag` app crate
//! supplies the concrete providers.
//!
//! ```text
//! Document ─▶ Segmenter ─▶ Chunk ─▶ EmbeddingIndex
//!                                         │
//! question ─▶ Retriever ─▶ filter ─▶ rerank ─▶ PromptTemplate ─▶ generate
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod rerank;
pub mod retrieve;

pub use error::{ChunkingError, IndexError, PipelineError, PromptError, ServiceError};
