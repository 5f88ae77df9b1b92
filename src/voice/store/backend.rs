//! Keystore backends: save/load/delete of one named secret blob

use super::StorageError;
use crate::validation::validate_record_name;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Abstract keystore holding opaque, already-encrypted records
pub trait SecretBackend: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the record atomically
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Remove the record; absent records are not an error
    fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// One file per record inside a private directory
pub struct FileSecretBackend {
    dir: PathBuf,
}

impl FileSecretBackend {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let name = validate_record_name(name)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        Ok(self.dir.join(format!("{}.sealed", name)))
    }
}

impl SecretBackend for FileSecretBackend {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.record_path(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.record_path(name)?;
        let tmp_path = path.with_extension("sealed.tmp");

        fs::write(&tmp_path, bytes)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        }

        // Rename is atomic on the same filesystem: readers see old or new, never partial
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.record_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process backend for tests and ephemeral sessions
#[derive(Default)]
pub struct MemorySecretBackend {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretBackend for MemorySecretBackend {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(name).cloned())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(name);
        Ok(())
    }
}
