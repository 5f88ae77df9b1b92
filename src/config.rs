use crate::audio::TARGET_SAMPLE_RATE;
use crate::validation::{self, ValidationError};
use crate::voice::embedding::EMBEDDING_DIM;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Which feature extractor to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Spectral,
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub kind: ExtractorKind,
    /// Working sample rate; input is resampled to this
    pub sample_rate_hz: u32,
    /// Minimum duration per utterance (ms)
    pub min_utterance_ms: u64,
    /// Embedding dimension
    pub dim: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            kind: ExtractorKind::Spectral,
            sample_rate_hz: TARGET_SAMPLE_RATE,
            min_utterance_ms: 1000,
            dim: EMBEDDING_DIM,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Cosine similarity threshold for verification (inclusive)
    pub threshold: f32,
    /// Maximum duration of one attempt (ms)
    pub timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            timeout_ms: 4000,
        }
    }
}

impl VerificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Override for the template directory (defaults to the app data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load config from file or create default
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content).context("Failed to parse config")?;
            config.validate().context("Invalid configuration")?;
            log::info!("Config loaded from: {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            log::info!("Default config created at: {}", path.display());
            Ok(config)
        }
    }

    /// Write config with owner-only permissions
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, toml_str)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .context("Failed to set config file permissions")?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_threshold(self.verification.threshold)?;
        validation::validate_timeout_ms(self.verification.timeout_ms)?;
        validation::validate_min_utterance_ms(self.extractor.min_utterance_ms)?;
        validation::validate_dim(self.extractor.dim)?;
        validation::validate_sample_rate(self.extractor.sample_rate_hz)?;
        Ok(())
    }
}
