//! Encrypted single-slot template storage
//!
//! Exactly zero or one enrolled template exists. It is sealed with
//! XChaCha20-Poly1305 under a device-scoped key and persisted through a
//! [`SecretBackend`] as one record with a fixed name. The clear metadata
//! (dimension, enrollment time) is bound as associated data.

pub mod backend;
pub mod keys;

pub use backend::{FileSecretBackend, MemorySecretBackend, SecretBackend};
pub use keys::{FileKeyProvider, KeyProvider, StaticKeyProvider};

use super::embedding::Embedding;
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use chrono::{DateTime, Utc};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Fixed identifier of the single template record
pub const TEMPLATE_RECORD: &str = "voice-template";

/// XChaCha20-Poly1305 nonce length (192-bit)
const NONCE_LEN: usize = 24;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template record could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Template encryption or decryption failed")]
    Crypto,

    #[error("Template record is corrupt: {0}")]
    Corrupt(String),

    #[error("Template is unavailable while the device is locked")]
    Locked,

    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),
}

/// Device unlock state consulted before touching plaintext
pub trait UnlockState: Send + Sync {
    fn is_unlocked(&self) -> bool;
}

/// For hosts without a lock screen
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUnlocked;

impl UnlockState for AlwaysUnlocked {
    fn is_unlocked(&self) -> bool {
        true
    }
}

/// Lock state driven by the host (e.g. screen lock notifications)
#[derive(Debug)]
pub struct LockSwitch {
    unlocked: AtomicBool,
}

impl LockSwitch {
    pub fn new(unlocked: bool) -> Self {
        Self {
            unlocked: AtomicBool::new(unlocked),
        }
    }

    pub fn lock(&self) {
        self.unlocked.store(false, Ordering::SeqCst);
    }

    pub fn unlock(&self) {
        self.unlocked.store(true, Ordering::SeqCst);
    }
}

impl UnlockState for LockSwitch {
    fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }
}

/// The enrolled embedding plus its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledTemplate {
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

/// Persisted record layout
#[derive(Serialize, Deserialize)]
struct SealedTemplate {
    dim: usize,
    /// RFC 3339, authenticated but not encrypted
    enrolled_at: String,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl SealedTemplate {
    fn associated_data(dim: usize, enrolled_at: &str) -> Vec<u8> {
        format!("{}|{}|{}", TEMPLATE_RECORD, dim, enrolled_at).into_bytes()
    }
}

/// Encrypted single-slot store for the enrolled template.
///
/// Writers (`save`, `delete`) exclude each other and readers; `load` calls
/// may run concurrently.
pub struct TemplateStore {
    backend: RwLock<Arc<dyn SecretBackend>>,
    keys: Arc<dyn KeyProvider>,
    unlock: Arc<dyn UnlockState>,
}

impl TemplateStore {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        keys: Arc<dyn KeyProvider>,
        unlock: Arc<dyn UnlockState>,
    ) -> Self {
        Self {
            backend: RwLock::new(backend),
            keys,
            unlock,
        }
    }

    /// Volatile store with a random key, for tests and demos
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemorySecretBackend::new()),
            Arc::new(StaticKeyProvider::random()),
            Arc::new(AlwaysUnlocked),
        )
    }

    fn cipher(&self) -> Result<XChaCha20Poly1305, StorageError> {
        let key = self.keys.template_key()?;
        Ok(XChaCha20Poly1305::new((&*key).into()))
    }

    fn ensure_unlocked(&self) -> Result<(), StorageError> {
        if self.unlock.is_unlocked() {
            Ok(())
        } else {
            Err(StorageError::Locked)
        }
    }

    /// Encrypt and persist `embedding`, replacing any previous template
    pub fn save(&self, embedding: &Embedding) -> Result<(), StorageError> {
        self.commit(embedding, None).map(|_| ())
    }

    /// Like [`save`](Self::save), but withdraws if `token` is cancelled before
    /// the record is written. The check happens under the write lock, so a
    /// `false` return means the previous template is untouched and `true`
    /// means the new one is live.
    pub fn save_unless_cancelled(
        &self,
        embedding: &Embedding,
        token: &CancellationToken,
    ) -> Result<bool, StorageError> {
        self.commit(embedding, Some(token))
    }

    fn commit(
        &self,
        embedding: &Embedding,
        token: Option<&CancellationToken>,
    ) -> Result<bool, StorageError> {
        self.ensure_unlocked()?;

        // Held across key lookup so first-use key creation is serialized too
        let backend = self.backend.write().unwrap_or_else(PoisonError::into_inner);
        let cipher = self.cipher()?;

        let enrolled_at = Utc::now().to_rfc3339();
        let dim = embedding.dim();

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = *XNonce::from_slice(&nonce_bytes);

        let plaintext = embedding.to_le_bytes();
        let aad = SealedTemplate::associated_data(dim, &enrolled_at);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_ref(),
                    aad: &aad,
                },
            )
            .map_err(|_| StorageError::Crypto)?;

        let record = SealedTemplate {
            dim,
            enrolled_at,
            nonce: nonce_bytes.to_vec(),
            ciphertext,
        };
        let json = serde_json::to_vec(&record)?;

        if token.is_some_and(|t| t.is_cancelled()) {
            log::info!("Template save withdrawn before commit");
            return Ok(false);
        }
        backend.write(TEMPLATE_RECORD, &json)?;

        log::info!("Template saved: dim={}", dim);
        Ok(true)
    }

    /// Load and decrypt the current template, `None` if never enrolled
    pub fn load(&self) -> Result<Option<EnrolledTemplate>, StorageError> {
        self.ensure_unlocked()?;

        let bytes = {
            let backend = self.backend.read().unwrap_or_else(PoisonError::into_inner);
            backend.read(TEMPLATE_RECORD)?
        };
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let record: SealedTemplate = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("Unparseable record: {}", e)))?;

        if record.nonce.len() != NONCE_LEN {
            return Err(StorageError::Corrupt("Invalid nonce length".to_string()));
        }
        let nonce = XNonce::from_slice(&record.nonce);

        let aad = SealedTemplate::associated_data(record.dim, &record.enrolled_at);
        let plaintext = zeroize::Zeroizing::new(
            self.cipher()?
                .decrypt(
                    nonce,
                    Payload {
                        msg: record.ciphertext.as_ref(),
                        aad: &aad,
                    },
                )
                .map_err(|_| StorageError::Crypto)?,
        );

        let embedding = Embedding::from_le_bytes(&plaintext)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        if embedding.dim() != record.dim {
            return Err(StorageError::Corrupt(format!(
                "Template has {} values, record declares {}",
                embedding.dim(),
                record.dim
            )));
        }

        let enrolled_at = DateTime::parse_from_rfc3339(&record.enrolled_at)
            .map_err(|e| StorageError::Corrupt(format!("Invalid timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(EnrolledTemplate {
            embedding,
            enrolled_at,
        }))
    }

    /// Remove any stored template. Idempotent.
    pub fn delete(&self) -> Result<(), StorageError> {
        let backend = self.backend.write().unwrap_or_else(PoisonError::into_inner);
        backend.remove(TEMPLATE_RECORD)?;
        log::info!("Template deleted");
        Ok(())
    }

    /// Whether a sealed record exists. Does not decrypt, so works while locked.
    pub fn is_enrolled(&self) -> Result<bool, StorageError> {
        let backend = self.backend.read().unwrap_or_else(PoisonError::into_inner);
        Ok(backend.read(TEMPLATE_RECORD)?.is_some())
    }

    /// Enrollment time from the clear metadata, without decrypting
    pub fn enrolled_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let bytes = {
            let backend = self.backend.read().unwrap_or_else(PoisonError::into_inner);
            backend.read(TEMPLATE_RECORD)?
        };
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let record: SealedTemplate = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("Unparseable record: {}", e)))?;
        let enrolled_at = DateTime::parse_from_rfc3339(&record.enrolled_at)
            .map_err(|e| StorageError::Corrupt(format!("Invalid timestamp: {}", e)))?;
        Ok(Some(enrolled_at.with_timezone(&Utc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec()).unwrap()
    }

    #[test]
    fn test_cancelled_save_leaves_previous_template() {
        let store = TemplateStore::in_memory();
        store.save(&embedding(&[1.0, 0.0])).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(!store
            .save_unless_cancelled(&embedding(&[0.0, 1.0]), &token)
            .unwrap());
        assert_eq!(
            store.load().unwrap().unwrap().embedding,
            embedding(&[1.0, 0.0])
        );

        let live = CancellationToken::new();
        assert!(store
            .save_unless_cancelled(&embedding(&[0.0, 1.0]), &live)
            .unwrap());
        assert_eq!(
            store.load().unwrap().unwrap().embedding,
            embedding(&[0.0, 1.0])
        );
    }

    #[test]
    fn test_concurrent_first_saves_share_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TemplateStore::new(
            Arc::new(FileSecretBackend::new(dir.path().to_path_buf()).unwrap()),
            Arc::new(FileKeyProvider::new(dir.path().join(".key"))),
            Arc::new(AlwaysUnlocked),
        ));
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let handles: Vec<_> = [[1.0f32, 0.0], [0.0, 1.0]]
            .into_iter()
            .map(|values| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.save(&embedding(&values)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Whichever write landed last must decrypt with the shared key
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.embedding.dim(), 2);
    }

    #[test]
    fn test_load_before_save_is_none() {
        let store = TemplateStore::in_memory();
        assert!(store.load().unwrap().is_none());
        assert!(!store.is_enrolled().unwrap());
        assert!(store.enrolled_at().unwrap().is_none());
    }

    #[test]
    fn test_save_load_delete() {
        let store = TemplateStore::in_memory();
        let e = embedding(&[0.5, -0.25, 1.0]);

        store.save(&e).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.embedding, e);
        assert!(loaded.enrolled_at <= Utc::now());
        assert_eq!(store.enrolled_at().unwrap(), Some(loaded.enrolled_at));

        store.delete().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_resave_overwrites_slot() {
        let store = TemplateStore::in_memory();
        store.save(&embedding(&[1.0, 0.0])).unwrap();
        store.save(&embedding(&[0.0, 1.0, 0.0])).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.embedding, embedding(&[0.0, 1.0, 0.0]));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = TemplateStore::in_memory();
        store.delete().unwrap();
        store.delete().unwrap();
    }

    #[test]
    fn test_ciphertext_at_rest() {
        let backend = Arc::new(MemorySecretBackend::new());
        let store = TemplateStore::new(
            backend.clone(),
            Arc::new(StaticKeyProvider::random()),
            Arc::new(AlwaysUnlocked),
        );
        let e = embedding(&[0.123, 0.456, 0.789, 0.321]);
        store.save(&e).unwrap();

        let raw = backend.read(TEMPLATE_RECORD).unwrap().unwrap();
        let plain = e.to_le_bytes();
        assert!(!raw.windows(plain.len()).any(|w| w == plain.as_slice()));
    }

    #[test]
    fn test_locked_device_blocks_plaintext_access() {
        let lock = Arc::new(LockSwitch::new(true));
        let store = TemplateStore::new(
            Arc::new(MemorySecretBackend::new()),
            Arc::new(StaticKeyProvider::random()),
            lock.clone(),
        );
        store.save(&embedding(&[1.0, 2.0])).unwrap();

        lock.lock();
        assert!(matches!(store.load(), Err(StorageError::Locked)));
        assert!(matches!(
            store.save(&embedding(&[1.0])),
            Err(StorageError::Locked)
        ));
        assert!(store.is_enrolled().unwrap());

        lock.unlock();
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn test_wrong_key_is_crypto_error() {
        let backend = Arc::new(MemorySecretBackend::new());
        let writer = TemplateStore::new(
            backend.clone(),
            Arc::new(StaticKeyProvider::new([1u8; 32])),
            Arc::new(AlwaysUnlocked),
        );
        writer.save(&embedding(&[1.0, 2.0])).unwrap();

        let reader = TemplateStore::new(
            backend,
            Arc::new(StaticKeyProvider::new([2u8; 32])),
            Arc::new(AlwaysUnlocked),
        );
        assert!(matches!(reader.load(), Err(StorageError::Crypto)));
    }

    #[test]
    fn test_tampered_metadata_detected() {
        let backend = Arc::new(MemorySecretBackend::new());
        let store = TemplateStore::new(
            backend.clone(),
            Arc::new(StaticKeyProvider::random()),
            Arc::new(AlwaysUnlocked),
        );
        store.save(&embedding(&[1.0, 2.0])).unwrap();

        let raw = backend.read(TEMPLATE_RECORD).unwrap().unwrap();
        let mut record: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        record["enrolled_at"] = serde_json::Value::from("2001-01-01T00:00:00+00:00");
        backend
            .write(TEMPLATE_RECORD, &serde_json::to_vec(&record).unwrap())
            .unwrap();

        assert!(matches!(store.load(), Err(StorageError::Crypto)));
    }

    #[test]
    fn test_garbage_record_is_corrupt() {
        let backend = Arc::new(MemorySecretBackend::new());
        backend.write(TEMPLATE_RECORD, b"{not json").unwrap();
        let store = TemplateStore::new(
            backend,
            Arc::new(StaticKeyProvider::random()),
            Arc::new(AlwaysUnlocked),
        );
        assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let open = || {
            TemplateStore::new(
                Arc::new(FileSecretBackend::new(dir.path().to_path_buf()).unwrap()),
                Arc::new(FileKeyProvider::new(dir.path().join(".key"))),
                Arc::new(AlwaysUnlocked),
            )
        };

        let e = embedding(&[0.1, 0.2, 0.3]);
        open().save(&e).unwrap();
        assert_eq!(open().load().unwrap().unwrap().embedding, e);
    }
}
