use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/// Application paths following OS conventions
#[derive(Clone, Debug)]
pub struct AppPaths {
    /// Configuration directory (thresholds, extractor settings)
    pub config: PathBuf,
    /// Data directory (encrypted template, key)
    pub data: PathBuf,
}

impl AppPaths {
    /// Resolve OS-specific paths for VoiceGate
    ///
    /// # Platform Paths
    ///
    /// ## Linux
    /// - Config: `~/.config/voicegate/`
    /// - Data: `~/.local/share/voicegate/` → templates/
    ///
    /// ## macOS
    /// - Config: `~/Library/Application Support/com.VoiceGate.VoiceGate/`
    /// - Data: `~/Library/Application Support/com.VoiceGate.VoiceGate/`
    ///
    /// ## Windows
    /// - Config: `%APPDATA%\VoiceGate\VoiceGate\config\`
    /// - Data: `%APPDATA%\VoiceGate\VoiceGate\data\`
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "VoiceGate", "VoiceGate")
            .context("Failed to determine project directories")?;

        Ok(Self {
            config: proj_dirs.config_dir().to_path_buf(),
            data: proj_dirs.data_dir().to_path_buf(),
        })
    }

    /// Use an explicit data directory (config stays at the OS location)
    pub fn with_data_dir(mut self, data: PathBuf) -> Self {
        self.data = data;
        self
    }

    /// Create all necessary directories
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.config).context("Failed to create config directory")?;
        fs::create_dir_all(self.templates_dir())
            .context("Failed to create templates directory")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(self.templates_dir(), fs::Permissions::from_mode(0o700))
                .context("Failed to set templates directory permissions")?;
        }

        log::info!("Application directories initialized");
        log::debug!("  Config: {}", self.config.display());
        log::debug!("  Data:   {}", self.data.display());

        Ok(())
    }

    /// Get path to config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Get path to the encrypted template directory
    pub fn templates_dir(&self) -> PathBuf {
        self.data.join("templates")
    }

    /// Get path to the template encryption key
    pub fn key_file(&self) -> PathBuf {
        self.templates_dir().join(".key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_creation() {
        let paths = AppPaths::new().expect("Failed to create paths");

        assert!(!paths.config.as_os_str().is_empty());
        assert!(!paths.data.as_os_str().is_empty());
        assert!(paths.config_file().ends_with("config.toml"));
    }

    #[test]
    fn test_data_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new()
            .unwrap()
            .with_data_dir(dir.path().to_path_buf());

        assert_eq!(paths.templates_dir(), dir.path().join("templates"));
        assert_eq!(paths.key_file(), dir.path().join("templates").join(".key"));
    }
}
