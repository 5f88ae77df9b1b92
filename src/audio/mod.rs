//! Audio input handling
//!
//! Capture happens outside this crate. Callers hand over an already-recorded
//! buffer as an [`AudioInput`], which is decoded into mono `f32` PCM on demand.

pub mod level;
pub mod resample;

use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Target sample rate for all audio processing (16 kHz)
pub const TARGET_SAMPLE_RATE: u32 = 16000;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to decode WAV data: {0}")]
    Decode(#[from] hound::Error),

    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("Audio contains non-finite samples")]
    NonFinite,

    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// Mono PCM samples in the range [-1.0, 1.0]
#[derive(Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate(sample_rate));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(AudioError::NonFinite);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Return this buffer at `target_rate`, resampling only when needed
    pub fn resampled(&self, target_rate: u32) -> Result<PcmBuffer, AudioError> {
        if target_rate == 0 {
            return Err(AudioError::InvalidSampleRate(target_rate));
        }
        if target_rate == self.sample_rate {
            return Ok(self.clone());
        }
        let samples = resample::resample(&self.samples, self.sample_rate, target_rate)?;
        Ok(Self {
            samples,
            sample_rate: target_rate,
        })
    }
}

impl std::fmt::Debug for PcmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmBuffer")
            .field("len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// A finite, already-captured audio sample handed to verify/enroll
#[derive(Debug, Clone)]
pub enum AudioInput {
    /// Decoded mono PCM
    Pcm(PcmBuffer),
    /// Encoded WAV bytes
    Wav(Vec<u8>),
    /// Path to a WAV file
    WavFile(PathBuf),
}

impl AudioInput {
    pub fn wav_file(path: impl AsRef<Path>) -> Self {
        AudioInput::WavFile(path.as_ref().to_path_buf())
    }

    /// Decode into mono PCM
    pub fn decode(&self) -> Result<PcmBuffer, AudioError> {
        match self {
            AudioInput::Pcm(buffer) => Ok(buffer.clone()),
            AudioInput::Wav(bytes) => {
                let reader = hound::WavReader::new(Cursor::new(bytes.as_slice()))?;
                decode_wav(reader)
            }
            AudioInput::WavFile(path) => {
                let reader = hound::WavReader::open(path)?;
                decode_wav(reader)
            }
        }
    }
}

impl From<PcmBuffer> for AudioInput {
    fn from(buffer: PcmBuffer) -> Self {
        AudioInput::Pcm(buffer)
    }
}

fn decode_wav<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<PcmBuffer, AudioError> {
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(AudioError::InvalidSampleRate(0));
    }
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(AudioError::UnsupportedBitDepth(spec.bits_per_sample));
            }
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    // Downmix to mono
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    log::debug!(
        "Decoded WAV: {} Hz, {}ch, {} bits -> {} mono samples",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        mono.len()
    );

    PcmBuffer::new(mono, spec.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(channels: u16, frames: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
            for &s in frames {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_decode_mono_wav() {
        let bytes = wav_bytes(1, &[0, i16::MAX, -16384]);
        let pcm = AudioInput::Wav(bytes).decode().unwrap();
        assert_eq!(pcm.sample_rate(), 8000);
        assert_eq!(pcm.len(), 3);
        assert!((pcm.samples()[1] - 1.0).abs() < 0.001);
        assert!((pcm.samples()[2] + 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        let bytes = wav_bytes(2, &[16384, 0, -16384, -16384]);
        let pcm = AudioInput::Wav(bytes).decode().unwrap();
        assert_eq!(pcm.len(), 2);
        assert!((pcm.samples()[0] - 0.25).abs() < 0.001);
        assert!((pcm.samples()[1] + 0.5).abs() < 0.001);
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let result = AudioInput::Wav(b"definitely not a riff header".to_vec()).decode();
        assert!(matches!(result, Err(AudioError::Decode(_))));
    }

    #[test]
    fn test_pcm_validation() {
        assert!(matches!(
            PcmBuffer::new(vec![0.0], 0),
            Err(AudioError::InvalidSampleRate(0))
        ));
        assert!(matches!(
            PcmBuffer::new(vec![0.0, f32::NAN], 16000),
            Err(AudioError::NonFinite)
        ));
        let pcm = PcmBuffer::new(vec![0.0; 16000], 16000).unwrap();
        assert_eq!(pcm.duration_ms(), 1000);
    }
}
