//! In-memory vector index over embedded chunks.
//!
//! The index is built once per run from the full chunk set and is read-only
//! afterwards, so it can be shared behind an `Arc` by concurrent queries
//! without locking. Search is exact: every query is scored against every
//! vector with cosine similarity (dot product of L2-normalized vectors),
//! which keeps results deterministic and stays well below a second for tens
//! of thousands of 3072-dimensional chunks.
//!
//! # Build
//!
//! 1. Reject an empty chunk set ([`IndexError::EmptyCorpus`]).
//! 2. Group chunks by content hash so each distinct text is embedded once.
//! 3. Embed the distinct texts in batches of `batch_size`.
//! 4. Abort on the first vector whose length differs from the provider's
//!    `dims()` ([`IndexError::DimensionMismatch`]).
//! 5. Normalize and store vectors in chunk insertion order.

use std::collections::HashMap;

use tracing::debug;

use crate::embedding::{dot, normalize, EmbeddingProvider};
use crate::error::IndexError;
use crate::models::{Chunk, ChunkRef, EmbeddedChunk};

/// Read-only nearest-neighbour index. See the module docs.
#[derive(Debug)]
pub struct EmbeddingIndex {
    model: String,
    dims: usize,
    entries: Vec<EmbeddedChunk>,
}

impl EmbeddingIndex {
    /// Embed `chunks` with `provider` and build the index.
    pub async fn build(
        provider: &dyn EmbeddingProvider,
        chunks: Vec<Chunk>,
        batch_size: usize,
    ) -> Result<Self, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }
        let dims = provider.dims();

        let mut slot_by_hash: HashMap<String, usize> = HashMap::new();
        let mut distinct: Vec<usize> = Vec::new();
        let mut chunk_slots: Vec<usize> = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let slot = *slot_by_hash.entry(chunk.hash.clone()).or_insert_with(|| {
                distinct.push(i);
                distinct.len() - 1
            });
            chunk_slots.push(slot);
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(distinct.len());
        for batch in distinct.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|&i| chunks[i].text.clone()).collect();
            let embedded = provider
                .embed(&texts)
                .await
                .map_err(IndexError::Embedding)?;
            if embedded.len() != texts.len() {
                return Err(IndexError::BatchSizeMismatch {
                    expected: texts.len(),
                    actual: embedded.len(),
                });
            }
            for (&i, mut vector) in batch.iter().zip(embedded) {
                check_dims(&chunks[i], dims, vector.len())?;
                normalize(&mut vector);
                vectors.push(vector);
            }
            debug!(
                embedded = vectors.len(),
                total = distinct.len(),
                "embedded chunk batch"
            );
        }

        let entries = chunks
            .into_iter()
            .zip(chunk_slots)
            .map(|(chunk, slot)| EmbeddedChunk {
                chunk,
                vector: vectors[slot].clone(),
            })
            .collect();

        Ok(Self {
            model: provider.model_name().to_string(),
            dims,
            entries,
        })
    }

    /// Build an index from vectors computed elsewhere.
    pub fn from_embedded(
        model: impl Into<String>,
        dims: usize,
        embedded: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<Self, IndexError> {
        if embedded.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }
        let mut entries = Vec::with_capacity(embedded.len());
        for (chunk, mut vector) in embedded {
            check_dims(&chunk, dims, vector.len())?;
            normalize(&mut vector);
            entries.push(EmbeddedChunk { chunk, vector });
        }
        Ok(Self {
            model: model.into(),
            dims,
            entries,
        })
    }

    /// Return the `k` chunks most similar to `query`, best first.
    ///
    /// Equal scores keep insertion order.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<(ChunkRef, f32)>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::QueryDimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(ChunkRef, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                // `+ 0.0` folds -0.0 into 0.0 so equal scores tie under total_cmp.
                let s = dot(&q, &e.vector) + 0.0;
                (ChunkRef(i), if s.is_nan() { f32::NEG_INFINITY } else { s })
            })
            .collect();

        let order = |a: &(ChunkRef, f32), b: &(ChunkRef, f32)| {
            b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, order);
            scored.truncate(k);
        }
        scored.sort_by(order);
        Ok(scored)
    }

    pub fn get(&self, chunk: ChunkRef) -> Option<&EmbeddedChunk> {
        self.entries.get(chunk.0)
    }

    pub fn chunk(&self, chunk: ChunkRef) -> Option<&Chunk> {
        self.get(chunk).map(|e| &e.chunk)
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmbeddedChunk> {
        self.entries.iter()
    }
}

fn check_dims(chunk: &Chunk, expected: usize, actual: usize) -> Result<(), IndexError> {
    if actual != expected {
        return Err(IndexError::DimensionMismatch {
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.chunk_index,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(doc: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            id: format!("{}-{}", doc, index),
            document_id: doc.to_string(),
            chunk_index: index,
            char_range: 0..text.chars().count(),
            text: text.to_string(),
            hash: format!("hash:{}", text),
        }
    }

    /// Embeds text by its length and first byte; counts embedded texts.
    struct LenEmbedder {
        dims: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for LenEmbedder {
        fn model_name(&self) -> &str {
            "len"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dims];
                    v[0] = t.len() as f32;
                    v[1] = t.bytes().next().unwrap_or(0) as f32;
                    v
                })
                .collect())
        }
    }

    struct WrongDims;

    #[async_trait]
    impl EmbeddingProvider for WrongDims {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_build_empty_corpus_fails() {
        let p = LenEmbedder {
            dims: 2,
            calls: AtomicUsize::new(0),
        };
        let err = EmbeddingIndex::build(&p, Vec::new(), 8).await.unwrap_err();
        assert!(matches!(err, IndexError::EmptyCorpus));
    }

    #[tokio::test]
    async fn test_build_dimension_mismatch_is_fatal() {
        let err = EmbeddingIndex::build(&WrongDims, vec![chunk("guide.pdf", 0, "x")], 8)
            .await
            .unwrap_err();
        match err {
            IndexError::DimensionMismatch {
                document_id,
                expected,
                actual,
                ..
            } => {
                assert_eq!(document_id, "guide.pdf");
                assert_eq!(expected, 4);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_texts_embedded_once() {
        let p = LenEmbedder {
            dims: 3,
            calls: AtomicUsize::new(0),
        };
        let chunks = vec![
            chunk("a", 0, "same"),
            chunk("b", 0, "same"),
            chunk("c", 0, "different"),
        ];
        let index = EmbeddingIndex::build(&p, chunks, 2).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
        assert_eq!(index.chunk(ChunkRef(1)).unwrap().document_id, "b");
        assert_eq!(
            index.get(ChunkRef(0)).unwrap().vector,
            index.get(ChunkRef(1)).unwrap().vector
        );
    }

    #[test]
    fn test_query_orders_by_similarity_with_stable_ties() {
        let index = EmbeddingIndex::from_embedded(
            "test",
            2,
            vec![
                (chunk("d", 0, "a"), vec![0.0, 1.0]),
                (chunk("d", 1, "b"), vec![1.0, 0.0]),
                (chunk("d", 2, "c"), vec![2.0, 0.0]),
                (chunk("d", 3, "e"), vec![1.0, 1.0]),
            ],
        )
        .unwrap();
        let hits = index.query(&[1.0, 0.0], 10).unwrap();
        let refs: Vec<usize> = hits.iter().map(|(r, _)| r.0).collect();
        assert_eq!(refs, vec![1, 2, 3, 0]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].1, hits[1].1);
    }

    #[test]
    fn test_zero_scores_of_either_sign_tie_by_insertion_order() {
        let index = EmbeddingIndex::from_embedded(
            "test",
            2,
            vec![
                (chunk("d", 0, "blank"), vec![0.0, 0.0]),
                (chunk("d", 1, "orthogonal"), vec![1.0, -1.0]),
            ],
        )
        .unwrap();
        let hits = index.query(&[-1.0, -1.0], 2).unwrap();
        assert_eq!(hits[0].0, ChunkRef(0));
        assert_eq!(hits[1].0, ChunkRef(1));
        assert!(hits.iter().all(|(_, s)| s.is_sign_positive()));
    }

    #[test]
    fn test_query_truncates_to_k() {
        let embedded = (0..50)
            .map(|i| (chunk("d", i, "t"), vec![i as f32, 1.0]))
            .collect();
        let index = EmbeddingIndex::from_embedded("test", 2, embedded).unwrap();
        let hits = index.query(&[1.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].0, ChunkRef(49));
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
        assert!(index.query(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index =
            EmbeddingIndex::from_embedded("test", 2, vec![(chunk("d", 0, "a"), vec![1.0, 0.0])])
                .unwrap();
        let err = index.query(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            IndexError::QueryDimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }
}
