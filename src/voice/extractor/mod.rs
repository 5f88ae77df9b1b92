//! Feature extraction - audio sample to fixed-length embedding
//!
//! Two implementations sit behind [`FeatureExtractor`]:
//! - Spectral (default): deterministic long-term average log spectrum
//! - Stub: digest-seeded placeholder values in [0, 1], for wiring and tests
//!
//! Neither is a trained speaker model. Swap in a real pipeline through the
//! trait before making any security claims.

use crate::audio::{level, AudioError, AudioInput, PcmBuffer};
use crate::config::{ExtractorConfig, ExtractorKind};
use std::sync::Arc;
use thiserror::Error;

pub mod spectral;
pub mod stub;

pub use spectral::SpectralExtractor;
pub use stub::StubExtractor;

use super::embedding::Embedding;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Audio too short or empty: {actual_ms}ms (minimum {min_ms}ms)")]
    EmptyOrTooShort { actual_ms: u64, min_ms: u64 },

    #[error("Audio has no voiced content")]
    Silent,

    #[error("Audio could not be decoded: {0}")]
    Unreadable(#[from] AudioError),

    #[error("Extractor produced {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ExtractionError {
    /// Whether the buffer was rejected for lacking usable samples
    pub fn is_too_short(&self) -> bool {
        matches!(
            self,
            ExtractionError::EmptyOrTooShort { .. } | ExtractionError::Silent
        )
    }
}

/// Turns a captured audio sample into an embedding of `dim()` values.
///
/// Implementations must be deterministic for identical input and safe to
/// call from several threads at once.
pub trait FeatureExtractor: Send + Sync {
    fn dim(&self) -> usize;

    fn extract(&self, audio: &AudioInput) -> Result<Embedding, ExtractionError>;
}

/// Build the extractor selected in configuration
pub fn from_config(config: &ExtractorConfig) -> Arc<dyn FeatureExtractor> {
    match config.kind {
        ExtractorKind::Spectral => {
            log::info!(
                "Using spectral extractor: dim={}, rate={}Hz",
                config.dim,
                config.sample_rate_hz
            );
            Arc::new(SpectralExtractor::new(config.clone()))
        }
        ExtractorKind::Stub => {
            log::warn!("Using STUB extractor: embeddings cannot distinguish speakers");
            Arc::new(StubExtractor::new(config.clone()))
        }
    }
}

/// Minimum sample count for `min_ms` at `sample_rate`
pub(crate) fn min_samples(min_ms: u64, sample_rate: u32) -> usize {
    (min_ms * sample_rate as u64 / 1000) as usize
}

/// Decode, resample to the working rate and check length and level
pub(crate) fn prepare(
    audio: &AudioInput,
    config: &ExtractorConfig,
) -> Result<PcmBuffer, ExtractionError> {
    let decoded = audio.decode()?;

    // Check length before resampling so empty input never reaches the resampler
    let needed = min_samples(config.min_utterance_ms, decoded.sample_rate());
    if decoded.is_empty() || decoded.len() < needed {
        return Err(ExtractionError::EmptyOrTooShort {
            actual_ms: decoded.duration_ms(),
            min_ms: config.min_utterance_ms,
        });
    }

    let pcm = decoded.resampled(config.sample_rate_hz)?;
    if level::is_silent(pcm.samples()) {
        return Err(ExtractionError::Silent);
    }
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_rejects_short_and_silent() {
        let config = ExtractorConfig::default();

        let empty = AudioInput::Pcm(PcmBuffer::new(vec![], 16000).unwrap());
        assert!(matches!(
            prepare(&empty, &config),
            Err(ExtractionError::EmptyOrTooShort { actual_ms: 0, .. })
        ));

        let short = AudioInput::Pcm(PcmBuffer::new(vec![0.3; 800], 16000).unwrap());
        assert!(prepare(&short, &config).unwrap_err().is_too_short());

        let silent = AudioInput::Pcm(PcmBuffer::new(vec![0.0; 32000], 16000).unwrap());
        assert!(matches!(
            prepare(&silent, &config),
            Err(ExtractionError::Silent)
        ));

        let garbage = AudioInput::Wav(vec![1, 2, 3]);
        assert!(matches!(
            prepare(&garbage, &config),
            Err(ExtractionError::Unreadable(_))
        ));
    }

    #[test]
    fn test_factory_honours_kind() {
        let mut config = ExtractorConfig {
            dim: 16,
            ..Default::default()
        };
        assert_eq!(from_config(&config).dim(), 16);

        config.kind = ExtractorKind::Stub;
        let stub = from_config(&config);
        let audio = AudioInput::Pcm(PcmBuffer::new(vec![0.2; 32000], 16000).unwrap());
        assert_eq!(stub.extract(&audio).unwrap().dim(), 16);
    }

    #[test]
    fn test_min_samples() {
        assert_eq!(min_samples(1000, 16000), 16000);
        assert_eq!(min_samples(250, 8000), 2000);
    }
}
