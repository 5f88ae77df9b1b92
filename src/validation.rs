//! Input validation for configuration and runtime parameters

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Validate verification threshold (cosine similarity, -1.0 to 1.0)
pub fn validate_threshold(threshold: f32) -> Result<f32, ValidationError> {
    if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
        return Err(ValidationError::InvalidRange(format!(
            "Threshold must be between -1.0 and 1.0, got {}",
            threshold
        )));
    }
    Ok(threshold)
}

/// Validate attempt timeout in milliseconds (100ms to 60000ms)
pub fn validate_timeout_ms(timeout_ms: u64) -> Result<u64, ValidationError> {
    if !(100..=60_000).contains(&timeout_ms) {
        return Err(ValidationError::InvalidRange(format!(
            "Timeout must be between 100ms and 60000ms, got {}ms",
            timeout_ms
        )));
    }
    Ok(timeout_ms)
}

/// Validate minimum utterance length in milliseconds (100ms to 10000ms)
pub fn validate_min_utterance_ms(duration_ms: u64) -> Result<u64, ValidationError> {
    if !(100..=10_000).contains(&duration_ms) {
        return Err(ValidationError::InvalidRange(format!(
            "Minimum utterance must be between 100ms and 10000ms, got {}ms",
            duration_ms
        )));
    }
    Ok(duration_ms)
}

/// Validate embedding dimension (1 to 4096)
pub fn validate_dim(dim: usize) -> Result<usize, ValidationError> {
    if !(1..=4096).contains(&dim) {
        return Err(ValidationError::InvalidRange(format!(
            "Embedding dimension must be between 1 and 4096, got {}",
            dim
        )));
    }
    Ok(dim)
}

/// Validate working sample rate (8kHz to 48kHz)
pub fn validate_sample_rate(rate_hz: u32) -> Result<u32, ValidationError> {
    if !(8_000..=48_000).contains(&rate_hz) {
        return Err(ValidationError::InvalidRange(format!(
            "Sample rate must be between 8000Hz and 48000Hz, got {}Hz",
            rate_hz
        )));
    }
    Ok(rate_hz)
}

/// Validate a secret record name (alphanumeric, underscore, hyphen; max 64 chars)
pub fn validate_record_name(name: &str) -> Result<&str, ValidationError> {
    if name.is_empty() || name.len() > 64 {
        return Err(ValidationError::InvalidFormat(format!(
            "Record name must be 1-64 characters, got {}",
            name.len()
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::InvalidFormat(
            "Record name can only contain letters, numbers, underscores, and hyphens".to_string(),
        ));
    }

    Ok(name)
}
