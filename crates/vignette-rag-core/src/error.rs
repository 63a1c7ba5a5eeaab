//! Error types shared by the pipeline stages.

/// Failure of an external service call (embedding, reranking, generation).
///
/// The variant decides retry behavior: only [`ServiceError::Transient`] and
/// [`ServiceError::Timeout`] are retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Rate limiting, 5xx responses, or connection failures.
    #[error("{service}: transient failure: {message}")]
    Transient { service: String, message: String },

    #[error("{service}: request timed out")]
    Timeout { service: String },

    /// Authentication failures and other 4xx responses.
    #[error("{service}: request rejected: {message}")]
    Permanent { service: String, message: String },

    /// The service answered, but the body did not match the expected schema.
    #[error("{service}: malformed response: {message}")]
    Malformed { service: String, message: String },
}

impl ServiceError {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn permanent(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Corpus-level failures while building or querying the index. Fatal.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("corpus produced no chunks; nothing to index")]
    EmptyCorpus,

    #[error(
        "embedding for chunk {chunk_index} of document '{document_id}' has {actual} dimensions, expected {expected}"
    )]
    DimensionMismatch {
        document_id: String,
        chunk_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("embedding provider returned {actual} vectors for a batch of {expected} chunks")]
    BatchSizeMismatch { expected: usize, actual: usize },

    #[error("query vector has {actual} dimensions but the index holds {expected}-dimensional vectors")]
    QueryDimensionMismatch { expected: usize, actual: usize },

    #[error("index was built with '{index_model}' but queries are embedded with '{query_model}'")]
    ModelMismatch {
        index_model: String,
        query_model: String,
    },

    #[error("failed to embed corpus: {0}")]
    Embedding(#[source] ServiceError),
}

/// Invalid segmenter configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkingError {
    #[error("chunk size must be > 0")]
    ZeroChunkSize,

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
}

/// Invalid prompt template configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("prompt template is missing the {0} placeholder")]
    MissingPlaceholder(&'static str),
}

/// Per-question failure. The batch records it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[source] ServiceError),

    #[error("retrieval failed: {0}")]
    Index(#[from] IndexError),

    #[error("reranking failed: {0}")]
    Rerank(#[source] ServiceError),
}
