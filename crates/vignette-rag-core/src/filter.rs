//! Similarity cutoff between retrieval and reranking.

use crate::models::ScoredCandidate;

/// Drop candidates whose similarity is strictly below `min_score`.
///
/// Order is preserved and the function is idempotent. A `NaN` similarity
/// never passes. An empty result is valid: the pipeline then answers with
/// an empty context block (see
/// [`EmptyContextPolicy`](crate::pipeline::EmptyContextPolicy)).
pub fn filter_by_similarity(
    candidates: Vec<ScoredCandidate>,
    min_score: f32,
) -> Vec<ScoredCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.similarity >= min_score)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkRef;

    fn cand(i: usize, s: f32) -> ScoredCandidate {
        ScoredCandidate::new(ChunkRef(i), s)
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let out = filter_by_similarity(vec![cand(0, 0.25), cand(1, 0.2499), cand(2, 0.9)], 0.25);
        let refs: Vec<usize> = out.iter().map(|c| c.chunk.0).collect();
        assert_eq!(refs, vec![0, 2]);
    }

    #[test]
    fn test_preserves_order() {
        let out = filter_by_similarity(vec![cand(3, 0.5), cand(1, 0.9), cand(2, 0.7)], 0.0);
        let refs: Vec<usize> = out.iter().map(|c| c.chunk.0).collect();
        assert_eq!(refs, vec![3, 1, 2]);
    }

    #[test]
    fn test_nan_is_dropped() {
        assert!(filter_by_similarity(vec![cand(0, f32::NAN)], -1.0).is_empty());
    }

    #[test]
    fn test_all_filtered_is_empty_not_error() {
        assert!(filter_by_similarity(vec![cand(0, 0.1), cand(1, 0.2)], 0.5).is_empty());
        assert!(filter_by_similarity(Vec::new(), 0.5).is_empty());
    }
}
