//! Offline sample-rate conversion for captured buffers

use super::AudioError;
use rubato::{FftFixedIn, Resampler};

/// Input chunk size fed to the FFT resampler
const CHUNK_SIZE: usize = 1024;

/// Resample a whole mono buffer from `from_rate` to `to_rate`.
///
/// The tail is zero-padded to a full chunk and the output is trimmed back to
/// the expected length, so the result is `len * to_rate / from_rate` samples.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == 0 {
        return Err(AudioError::InvalidSampleRate(from_rate));
    }
    if to_rate == 0 {
        return Err(AudioError::InvalidSampleRate(to_rate));
    }
    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        2, // Sub-chunks
        1, // Mono
    )
    .map_err(|e| AudioError::Resample(e.to_string()))?;

    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);

    let mut position = 0;
    // Keep feeding (zero-padded) chunks until the delayed output covers the input
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        let mut chunk = vec![0.0f32; needed];
        if position < samples.len() {
            let end = (position + needed).min(samples.len());
            chunk[..end - position].copy_from_slice(&samples[position..end]);
        }
        position += needed;

        let input_vec = vec![chunk];
        let processed = resampler
            .process(&input_vec, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if let Some(channel) = processed.into_iter().next() {
            output.extend(channel);
        }
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rate_is_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
    }

    #[test]
    fn test_output_length_follows_ratio() {
        let samples: Vec<f32> = (0..48000)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 48000.0).sin() * 0.5)
            .collect();
        let out = resample(&samples, 48000, 16000).unwrap();
        assert_eq!(out.len(), 16000);
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(
            resample(&[0.0], 0, 16000),
            Err(AudioError::InvalidSampleRate(0))
        ));
    }
}
