//! Core data models that flow through ingestion and retrieval.
//!
//! Ownership follows the pipeline: a [`Document`] lives only until it has
//! been segmented, [`Chunk`]s move into the index as [`EmbeddedChunk`]s, and
//! per-query [`ScoredCandidate`]s point back into the index through a
//! [`ChunkRef`] instead of copying chunk text.

use std::ops::Range;
use std::path::PathBuf;

use serde::Serialize;

/// A parsed source document, produced by the external text extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable identifier, usually the path relative to the corpus root.
    pub id: String,
    /// Display title (file name for filesystem documents).
    pub title: Option<String>,
    /// File the text was extracted from, if any.
    pub source_path: Option<PathBuf>,
    /// MIME type of the original file.
    pub content_type: String,
    /// Extracted plain text.
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            source_path: None,
            content_type: "text/plain".to_string(),
            text: text.into(),
        }
    }
}

/// A contiguous slice of one document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Deterministic identifier: SHA-256 of `document_id:chunk_index`.
    pub id: String,
    pub document_id: String,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: usize,
    /// Character (Unicode scalar) range within the document text.
    pub char_range: Range<usize>,
    pub text: String,
    /// SHA-256 of `text`, used to embed duplicate texts only once.
    pub hash: String,
}

impl Chunk {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.char_range.end - self.char_range.start
    }
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    /// L2-normalized embedding vector.
    pub vector: Vec<f32>,
}

/// Non-owning reference into an [`EmbeddingIndex`](crate::index::EmbeddingIndex).
///
/// The wrapped value is the chunk's insertion position, which doubles as the
/// deterministic tie-breaker for equal scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChunkRef(pub usize);

/// A retrieval candidate for a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub chunk: ChunkRef,
    /// Cosine similarity between the query and chunk embeddings.
    pub similarity: f32,
    /// Cross-encoder relevance score, set by the reranker.
    pub rerank_score: Option<f32>,
}

impl ScoredCandidate {
    pub fn new(chunk: ChunkRef, similarity: f32) -> Self {
        Self {
            chunk,
            similarity,
            rerank_score: None,
        }
    }
}
