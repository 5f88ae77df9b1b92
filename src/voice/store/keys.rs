//! Template encryption key material

use super::StorageError;
use chacha20poly1305::aead::OsRng;
use rand_core::RngCore;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use zeroize::Zeroizing;

/// Length of the template encryption key (256-bit)
pub const KEY_LEN: usize = 32;

/// Supplies the device-scoped template key. The key never leaves the store.
pub trait KeyProvider: Send + Sync {
    fn template_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, StorageError>;
}

/// Key file next to the sealed template, created on first use
pub struct FileKeyProvider {
    key_path: PathBuf,
    /// Serializes first-use creation within the process
    create_lock: Mutex<()>,
}

impl FileKeyProvider {
    pub fn new(key_path: PathBuf) -> Self {
        Self {
            key_path,
            create_lock: Mutex::new(()),
        }
    }

    fn read_key(&self) -> Result<Option<Zeroizing<[u8; KEY_LEN]>>, StorageError> {
        let key_bytes = match fs::read(&self.key_path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::KeyUnavailable(format!(
                    "Failed to read encryption key: {}",
                    e
                )))
            }
        };
        if key_bytes.len() != KEY_LEN {
            return Err(StorageError::KeyUnavailable(
                "Invalid encryption key length".to_string(),
            ));
        }
        let mut key_array = Zeroizing::new([0u8; KEY_LEN]);
        key_array.copy_from_slice(&key_bytes);
        Ok(Some(key_array))
    }

    /// Write a complete key to a private temp file, then link it into place.
    /// Returns false if another writer published a key first.
    fn publish_key(&self, key: &[u8; KEY_LEN]) -> Result<bool, StorageError> {
        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self
            .key_path
            .with_extension(format!("tmp.{}", std::process::id()));

        let write_tmp = || -> std::io::Result<()> {
            let mut options = OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp_path)?;
            file.write_all(key)?;
            file.sync_all()
        };

        // Leftover from a crashed run
        let _ = fs::remove_file(&tmp_path);
        let written = write_tmp().and_then(|_| fs::hard_link(&tmp_path, &self.key_path));
        let _ = fs::remove_file(&tmp_path);

        match written {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StorageError::KeyUnavailable(format!(
                "Failed to write encryption key: {}",
                e
            ))),
        }
    }
}

impl KeyProvider for FileKeyProvider {
    fn template_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, StorageError> {
        if let Some(key) = self.read_key()? {
            return Ok(key);
        }

        let _creating = self
            .create_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = self.read_key()? {
            return Ok(key);
        }

        let mut key_array = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *key_array);

        if self.publish_key(&key_array)? {
            log::info!("Generated new template encryption key");
            return Ok(key_array);
        }

        // Another process won the race
        self.read_key()?.ok_or_else(|| {
            StorageError::KeyUnavailable("Encryption key vanished after creation".to_string())
        })
    }
}

/// Key held in memory for the lifetime of the provider
pub struct StaticKeyProvider {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl StaticKeyProvider {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Fresh random key
    pub fn random() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *key);
        Self { key }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn template_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, StorageError> {
        Ok(self.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileKeyProvider::new(dir.path().join(".key"));

        let first = provider.template_key().unwrap();
        let second = provider.template_key().unwrap();
        assert_eq!(*first, *second);
        assert_eq!(fs::read(dir.path().join(".key")).unwrap().len(), KEY_LEN);
    }

    #[test]
    fn test_concurrent_first_use_agrees_on_one_key() {
        use std::sync::{Arc, Barrier};

        for _ in 0..20 {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(FileKeyProvider::new(dir.path().join(".key")));
            let barrier = Arc::new(Barrier::new(4));

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let provider = provider.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        *provider.template_key().unwrap()
                    })
                })
                .collect();
            let keys: Vec<[u8; KEY_LEN]> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert!(keys.windows(2).all(|w| w[0] == w[1]));
            assert_eq!(fs::read(dir.path().join(".key")).unwrap(), keys[0].to_vec());
        }
    }

    #[test]
    fn test_separate_providers_share_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileKeyProvider::new(dir.path().join(".key"));
        let b = FileKeyProvider::new(dir.path().join(".key"));

        let key = a.template_key().unwrap();
        assert_eq!(*b.template_key().unwrap(), *key);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".key");
        FileKeyProvider::new(path.clone()).template_key().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_truncated_key_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".key"), [1u8; 5]).unwrap();
        let provider = FileKeyProvider::new(dir.path().join(".key"));

        assert!(matches!(
            provider.template_key(),
            Err(StorageError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn test_random_keys_differ() {
        let a = StaticKeyProvider::random().template_key().unwrap();
        let b = StaticKeyProvider::random().template_key().unwrap();
        assert_ne!(*a, *b);
    }
}
