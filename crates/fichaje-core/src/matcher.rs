//! Nearest-neighbour matching of a probe embedding against stored vectors.

use crate::types::{Embedding, StoredVector};
use serde::Serialize;

/// Default cosine-similarity threshold for live recognition.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;

/// Result of matching a probe embedding against a corpus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchResult {
    Matched {
        employee_id: String,
        vector_id: String,
        /// Cosine similarity of the best match [-1, 1].
        similarity: f32,
    },
    NoMatch {
        /// Best similarity seen, if the corpus was not empty.
        best_similarity: Option<f32>,
    },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }
}

/// Strategy for comparing a probe embedding against a corpus of stored vectors.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, corpus: &[StoredVector], threshold: f32) -> MatchResult;
}

/// Brute-force cosine similarity matcher.
///
/// Scans the whole corpus; the first entry reaching the maximum similarity wins,
/// so the result is deterministic for a deterministically ordered corpus.
/// A best similarity equal to `threshold` is a match.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, corpus: &[StoredVector], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, stored) in corpus.iter().enumerate() {
            let sim = probe.similarity(&stored.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult::Matched {
                employee_id: corpus[idx].employee_id.clone(),
                vector_id: corpus[idx].id.clone(),
                similarity: best_sim,
            },
            Some(_) => MatchResult::NoMatch {
                best_similarity: Some(best_sim),
            },
            None => MatchResult::NoMatch {
                best_similarity: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, employee: &str, values: Vec<f32>) -> StoredVector {
        StoredVector {
            id: id.into(),
            image_id: format!("img-{id}"),
            employee_id: employee.into(),
            model: "test".into(),
            version: None,
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_cosine_matcher_scans_whole_corpus() {
        // Best match is the last entry.
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let corpus = vec![
            stored("1", "decoy1", vec![0.0, 1.0, 0.0]),
            stored("2", "decoy2", vec![0.0, 0.0, 1.0]),
            stored("3", "match", vec![1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&probe, &corpus, 0.5);
        match result {
            MatchResult::Matched { employee_id, vector_id, similarity } => {
                assert_eq!(employee_id, "match");
                assert_eq!(vector_id, "3");
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_cosine_matcher_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let corpus = vec![stored("1", "other", vec![0.0, 1.0, 0.0])];

        let result = CosineMatcher.compare(&probe, &corpus, 0.5);
        match result {
            MatchResult::NoMatch { best_similarity: Some(s) } => assert!(s.abs() < 1e-6),
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn test_cosine_matcher_empty_corpus() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = CosineMatcher.compare(&probe, &[], 0.5);
        assert_eq!(result, MatchResult::NoMatch { best_similarity: None });
        // Even a permissive threshold cannot produce a match.
        let result = CosineMatcher.compare(&probe, &[], -1.0);
        assert!(!result.is_match());
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        // cos(a, b) = 0.6 exactly: a = (1, 0), b = (0.6, 0.8)
        let probe = Embedding::new(vec![1.0, 0.0]);
        let corpus = vec![stored("1", "e1", vec![0.6, 0.8])];
        let sim = probe.similarity(&corpus[0].embedding);

        assert!(CosineMatcher.compare(&probe, &corpus, sim).is_match());
        assert!(!CosineMatcher.compare(&probe, &corpus, sim + 1e-4).is_match());
    }

    #[test]
    fn test_self_similarity_meets_any_threshold() {
        let v = vec![0.3, -0.1, 0.7, 0.2];
        let probe = Embedding::new(v.clone());
        let corpus = vec![stored("1", "e1", v)];
        for threshold in [0.0, 0.6, 0.99, 1.0 - 1e-6] {
            assert!(CosineMatcher.compare(&probe, &corpus, threshold).is_match());
        }
    }

    #[test]
    fn test_tie_break_first_entry_wins() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let corpus = vec![
            stored("a", "first", vec![2.0, 0.0]),
            stored("b", "second", vec![1.0, 0.0]),
        ];
        match CosineMatcher.compare(&probe, &corpus, 0.6) {
            MatchResult::Matched { employee_id, .. } => assert_eq!(employee_id, "first"),
            other => panic!("expected match, got {other:?}"),
        }
    }
}
