//! Speaker embedding vector

use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Default embedding dimension
pub const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("Embedding must not be empty")]
    Empty,

    #[error("Embedding contains non-finite values")]
    NonFinite,

    #[error("Embedding byte length {0} is not a multiple of 4")]
    InvalidByteLength(usize),
}

/// Fixed-length speaker embedding.
///
/// The values are wiped on drop and never printed: `Debug` shows only the
/// dimension.
#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Euclidean norm
    pub fn norm(&self) -> f32 {
        self.0
            .iter()
            .map(|&x| (x as f64) * (x as f64))
            .sum::<f64>()
            .sqrt() as f32
    }

    /// Scale to unit length (no-op for a zero vector)
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 0.0 {
            for x in self.0.iter_mut() {
                *x /= norm;
            }
        }
    }

    /// Little-endian byte encoding, wiped when dropped
    pub(crate) fn to_le_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.0.iter().flat_map(|&f| f.to_le_bytes()).collect())
    }

    pub(crate) fn from_le_bytes(bytes: &[u8]) -> Result<Self, EmbeddingError> {
        if bytes.len() % 4 != 0 {
            return Err(EmbeddingError::InvalidByteLength(bytes.len()));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::new(values)
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("dim", &self.0.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_non_finite() {
        assert_eq!(Embedding::new(vec![]), Err(EmbeddingError::Empty));
        assert_eq!(
            Embedding::new(vec![1.0, f32::INFINITY]),
            Err(EmbeddingError::NonFinite)
        );
    }

    #[test]
    fn test_normalize_embedding() {
        let mut embedding = Embedding::new(vec![3.0, 4.0]).unwrap();
        embedding.normalize();
        assert!((embedding.norm() - 1.0).abs() < 0.001);
        assert!((embedding.as_slice()[0] - 0.6).abs() < 0.001);
    }

    #[test]
    fn test_byte_encoding() {
        let embedding = Embedding::new(vec![0.25, -1.5, 3.0]).unwrap();
        let bytes = embedding.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Embedding::from_le_bytes(&bytes).unwrap(), embedding);
        assert_eq!(
            Embedding::from_le_bytes(&bytes[..5]),
            Err(EmbeddingError::InvalidByteLength(5))
        );
    }

    #[test]
    fn test_debug_does_not_leak_values() {
        let embedding = Embedding::new(vec![0.123456, 0.654321]).unwrap();
        let printed = format!("{:?}", embedding);
        assert!(printed.contains("dim: 2"));
        assert!(!printed.contains("0.123456"));
    }
}
