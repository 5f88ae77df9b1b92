//! Stub extractor for development without a speaker model
//!
//! Produces values uniformly spread over [0, 1] like the original
//! placeholder, but seeds them from a SHA-256 digest of the decoded samples so
//! identical audio always yields the identical embedding. It cannot tell
//! speakers apart: any change to the samples gives an unrelated vector.

use super::{prepare, ExtractionError, FeatureExtractor};
use crate::audio::AudioInput;
use crate::config::ExtractorConfig;
use crate::voice::embedding::Embedding;
use sha2::{Digest, Sha256};

pub struct StubExtractor {
    config: ExtractorConfig,
    dim: usize,
}

impl StubExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        // Same floor as the spectral extractor: at least one value
        let dim = config.dim.max(1);
        Self { config, dim }
    }
}

impl FeatureExtractor for StubExtractor {
    fn dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, audio: &AudioInput) -> Result<Embedding, ExtractionError> {
        let pcm = prepare(audio, &self.config)?;

        let mut hasher = Sha256::new();
        for sample in pcm.samples() {
            hasher.update(sample.to_le_bytes());
        }
        let seed = hasher.finalize();

        // Expand the seed: one digest per block of 8 values
        let mut values = Vec::with_capacity(self.dim);
        let mut block = 0u32;
        while values.len() < self.dim {
            let digest = Sha256::new()
                .chain_update(seed)
                .chain_update(block.to_le_bytes())
                .finalize();
            for chunk in digest.chunks_exact(4) {
                if values.len() == self.dim {
                    break;
                }
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                values.push(raw as f32 / u32::MAX as f32);
            }
            block += 1;
        }

        log::trace!("[STUB] Embedding generated: dim={}", values.len());
        let actual = values.len();
        Embedding::new(values).map_err(|_| ExtractionError::DimensionMismatch {
            expected: self.dim,
            actual,
        })
    }
}
