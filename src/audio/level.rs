//! Audio level metering

/// RMS below this is treated as silence (about -80 dBFS)
pub const SILENCE_RMS: f32 = 1e-4;

/// Root-mean-square level of a mono f32 frame, 0.0 for an empty frame
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum: f64 = frame.iter().map(|&x| (x as f64) * (x as f64)).sum();
    (sum / frame.len() as f64).sqrt() as f32
}

/// Whether the frame carries any signal above the silence floor
pub fn is_silent(frame: &[f32]) -> bool {
    rms(frame) < SILENCE_RMS
}
