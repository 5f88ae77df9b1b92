//! Similarity scoring between two embeddings

use super::embedding::Embedding;
use thiserror::Error;

/// Cosine similarity, in [-1, 1]
pub type MatchScore = f32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Cannot score a zero-magnitude embedding")]
    ZeroMagnitude,
}

/// Scores a probe embedding against an enrolled one
pub trait Matcher: Send + Sync {
    fn score(&self, a: &Embedding, b: &Embedding) -> Result<MatchScore, MatchError>;
}

/// Cosine similarity matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn score(&self, a: &Embedding, b: &Embedding) -> Result<MatchScore, MatchError> {
        cosine_similarity(a.as_slice(), b.as_slice())
    }
}

/// Compute cosine similarity between two vectors.
///
/// Unequal lengths (including empty input) and zero-magnitude vectors are
/// errors, never a low score. Accumulates in f64.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<MatchScore, MatchError> {
    if a.len() != b.len() || a.is_empty() {
        return Err(MatchError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(MatchError::ZeroMagnitude);
    }

    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(score.clamp(-1.0, 1.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Ok(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Ok(0.0));

        let opposite = cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap();
        assert!((opposite + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert_eq!(
            cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]),
            Err(MatchError::DimensionMismatch { left: 2, right: 3 })
        );
        assert_eq!(
            cosine_similarity(&[], &[]),
            Err(MatchError::DimensionMismatch { left: 0, right: 0 })
        );
    }

    #[test]
    fn test_zero_magnitude() {
        assert_eq!(
            cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]),
            Err(MatchError::ZeroMagnitude)
        );
        assert_eq!(
            cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]),
            Err(MatchError::ZeroMagnitude)
        );
    }

    #[test]
    fn test_matcher_trait() {
        let t = Embedding::new(vec![1.0, 0.0]).unwrap();
        let p = Embedding::new(vec![0.0, 1.0]).unwrap();
        assert_eq!(CosineMatcher.score(&t, &t), Ok(1.0));
        assert_eq!(CosineMatcher.score(&t, &p), Ok(0.0));
    }

    fn vector(len: usize) -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-100.0f32..100.0, len)
    }

    fn non_zero(v: &[f32]) -> bool {
        v.iter().any(|&x| x.abs() > 1e-3)
    }

    proptest! {
        #[test]
        fn prop_self_similarity(a in vector(128)) {
            prop_assume!(non_zero(&a));
            let score = cosine_similarity(&a, &a).unwrap();
            prop_assert!((score - 1.0).abs() < 1e-5);
        }

        #[test]
        fn prop_symmetry((a, b) in (1usize..64).prop_flat_map(|n| (vector(n), vector(n)))) {
            prop_assume!(non_zero(&a) && non_zero(&b));
            prop_assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        }

        #[test]
        fn prop_unequal_lengths_never_score(a in prop::collection::vec(-1.0f32..1.0, 0..16),
                                            b in prop::collection::vec(-1.0f32..1.0, 0..16)) {
            prop_assume!(a.len() != b.len());
            let is_mismatch = matches!(
                cosine_similarity(&a, &b),
                Err(MatchError::DimensionMismatch { .. })
            );
            prop_assert!(is_mismatch);
        }
    }
}
