//! Deterministic spectral extractor
//!
//! Computes a long-term average log spectrum: Hann-windowed frames, Goertzel
//! power at `dim` log-spaced band centres, log-compressed with a floor 80 dB
//! under each frame's peak and averaged over the utterance, then mean-removed
//! across bands and L2-normalised.

use super::{prepare, ExtractionError, FeatureExtractor};
use crate::audio::AudioInput;
use crate::config::ExtractorConfig;
use crate::voice::embedding::Embedding;

/// Analysis frame length (ms)
const FRAME_MS: u32 = 25;
/// Hop between frames (ms)
const HOP_MS: u32 = 10;
/// Lowest band centre (Hz)
const MIN_BAND_HZ: f32 = 80.0;
/// Highest band centre as a fraction of the sample rate (just under Nyquist)
const MAX_BAND_FRACTION: f32 = 0.475;
/// Per-frame dynamic range kept below the strongest band (80 dB)
const DYNAMIC_RANGE: f64 = 1e-8;
/// Absolute floor added before the log to keep silent frames finite
const POWER_FLOOR: f64 = 1e-20;

pub struct SpectralExtractor {
    config: ExtractorConfig,
    window: Vec<f32>,
    /// Goertzel coefficient `2cos(w)` per band
    coeffs: Vec<f64>,
    hop: usize,
}

impl SpectralExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let rate = config.sample_rate_hz as f32;
        let frame_len = (config.sample_rate_hz * FRAME_MS / 1000) as usize;
        let hop = (config.sample_rate_hz * HOP_MS / 1000).max(1) as usize;

        let window = (0..frame_len)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * n as f32 / frame_len.saturating_sub(1).max(1) as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();

        let max_hz = rate * MAX_BAND_FRACTION;
        let dim = config.dim.max(1);
        let coeffs = (0..dim)
            .map(|k| {
                let t = if dim == 1 {
                    0.0
                } else {
                    k as f32 / (dim - 1) as f32
                };
                let hz = MIN_BAND_HZ * (max_hz / MIN_BAND_HZ).powf(t);
                2.0 * (2.0 * std::f64::consts::PI * hz as f64 / rate as f64).cos()
            })
            .collect();

        Self {
            config,
            window,
            coeffs,
            hop,
        }
    }

    /// Goertzel power of one windowed frame at each band
    fn band_powers(&self, frame: &[f32], out: &mut [f64]) {
        for (power, &coeff) in out.iter_mut().zip(self.coeffs.iter()) {
            let (mut s1, mut s2) = (0.0f64, 0.0f64);
            for (&x, &w) in frame.iter().zip(self.window.iter()) {
                let s0 = (x * w) as f64 + coeff * s1 - s2;
                s2 = s1;
                s1 = s0;
            }
            *power = (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0);
        }
    }
}

impl FeatureExtractor for SpectralExtractor {
    fn dim(&self) -> usize {
        self.coeffs.len()
    }

    fn extract(&self, audio: &AudioInput) -> Result<Embedding, ExtractionError> {
        let pcm = prepare(audio, &self.config)?;
        let samples = pcm.samples();
        let frame_len = self.window.len();

        let dim = self.dim();
        let mut average = vec![0.0f64; dim];
        let mut powers = vec![0.0f64; dim];
        let mut frames = 0usize;

        let mut start = 0;
        while start + frame_len <= samples.len() {
            self.band_powers(&samples[start..start + frame_len], &mut powers);
            // Floor relative to the frame peak keeps the log spectrum gain invariant
            let peak = powers.iter().cloned().fold(0.0f64, f64::max);
            let floor = peak * DYNAMIC_RANGE + POWER_FLOOR;
            for (acc, &p) in average.iter_mut().zip(powers.iter()) {
                *acc += (p + floor).ln();
            }
            frames += 1;
            start += self.hop;
        }

        if frames == 0 {
            return Err(ExtractionError::EmptyOrTooShort {
                actual_ms: pcm.duration_ms(),
                min_ms: self.config.min_utterance_ms,
            });
        }

        // Average over frames, then remove the spectral mean (overall gain)
        let scale = frames as f64;
        average.iter_mut().for_each(|v| *v /= scale);
        let mean = average.iter().sum::<f64>() / dim as f64;

        let values = average.iter().map(|&v| (v - mean) as f32).collect();
        let mut embedding = Embedding::new(values).map_err(|_| ExtractionError::Silent)?;
        if embedding.norm() == 0.0 {
            return Err(ExtractionError::Silent);
        }
        embedding.normalize();

        log::debug!(
            "Spectral embedding extracted: {} frames, dim={}",
            frames,
            dim
        );
        Ok(embedding)
    }
}
