//! Secret encryption.
//!
//! [`EncryptionService`] is a process singleton wrapping AES-256-GCM. The 256-bit key is
//! acquired in priority order: the OS keychain (via [`keyring`]), falling back to a 0600 file
//! under `~/.therese/.encryption_key`, self-created on first use. Every value persisted through
//! this service is base64-encoded `nonce || ciphertext`, which doubles as the heuristic behind
//! [`EncryptionService::is_encrypted`].

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use std::path::Path;
use std::sync::OnceLock;
use tokio::sync::Mutex;

use crate::error::TheresError;

const KEYCHAIN_SERVICE: &str = "com.therese.assistant";
const KEYCHAIN_ACCOUNT: &str = "encryption-key";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// AEAD secret encryption backed by a process-singleton 256-bit key.
pub struct EncryptionService {
    cipher: Mutex<Aes256Gcm>,
}

static INSTANCE: OnceLock<std::sync::Arc<EncryptionService>> = OnceLock::new();

impl EncryptionService {
    /// Acquire the process-singleton instance, initialising the key on first call.
    ///
    /// Guarded by [`OnceLock`] so that concurrent first-callers race safely to a single
    /// initialisation (double-checked locking).
    pub fn instance(key_file: &Path) -> Result<std::sync::Arc<EncryptionService>, TheresError> {
        if let Some(existing) = INSTANCE.get() {
            return Ok(existing.clone());
        }
        let key = acquire_key(key_file)?;
        log::info!("encryption key acquired, fingerprint {}", key_fingerprint(&key));
        let service = std::sync::Arc::new(EncryptionService {
            cipher: Mutex::new(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))),
        });
        let _ = INSTANCE.set(service.clone());
        Ok(service)
    }

    /// Construct a standalone instance from an explicit key, bypassing the singleton.
    ///
    /// Used by rotation (the caller holds the old key after rotating) and by tests.
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        EncryptionService {
            cipher: Mutex::new(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))),
        }
    }

    /// Encrypt `plaintext`, returning a base64 string of `nonce || ciphertext`.
    ///
    /// Each call draws a fresh random nonce, so two encryptions of the same plaintext never
    /// produce the same ciphertext.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String, TheresError> {
        let cipher = self.cipher.lock().await;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| TheresError::Unknown(format!("encryption failure: {e}")))?;
        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(format!("enc:v1:{}", BASE64.encode(combined)))
    }

    /// Decrypt a string produced by [`EncryptionService::encrypt`].
    pub async fn decrypt(&self, ciphertext: &str) -> Result<String, TheresError> {
        let body = ciphertext
            .strip_prefix("enc:v1:")
            .ok_or_else(|| TheresError::Validation("not an encrypted value".to_string()))?;
        let raw = BASE64
            .decode(body)
            .map_err(|e| TheresError::Validation(format!("malformed ciphertext: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(TheresError::Validation("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = self.cipher.lock().await;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| TheresError::Unknown(format!("decryption failure: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| TheresError::Unknown(format!("decrypted bytes were not UTF-8: {e}")))
    }

    /// Heuristic: does `value` look like something [`EncryptionService::encrypt`] produced?
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with("enc:v1:") && BASE64.decode(&value[7..]).is_ok()
    }
}

/// A short, non-reversible fingerprint of a key, safe to log: lets an operator confirm two
/// processes are running with the same encryption key without ever logging the key itself.
pub fn key_fingerprint(key: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(key);
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Rotate the on-disk/keychain key, returning the previous key so callers can re-encrypt
/// existing secrets before discarding it.
pub fn rotate_key(key_file: &Path) -> Result<[u8; KEY_LEN], TheresError> {
    let old_key = load_key(key_file)?;
    let mut new_key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut new_key);
    store_key(key_file, &new_key)?;
    Ok(old_key)
}

fn acquire_key(key_file: &Path) -> Result<[u8; KEY_LEN], TheresError> {
    if let Ok(existing) = load_key(key_file) {
        return Ok(existing);
    }
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    store_key(key_file, &key)?;
    Ok(key)
}

fn keychain_entry() -> Result<keyring::Entry, TheresError> {
    keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
        .map_err(|e| TheresError::Unknown(format!("keychain unavailable: {e}")))
}

fn load_key(key_file: &Path) -> Result<[u8; KEY_LEN], TheresError> {
    if let Ok(entry) = keychain_entry() {
        if let Ok(encoded) = entry.get_password() {
            if let Ok(bytes) = BASE64.decode(encoded) {
                if let Ok(key) = bytes.try_into() {
                    return Ok(key);
                }
            }
        }
    }
    let encoded = std::fs::read_to_string(key_file)
        .map_err(|e| TheresError::Unknown(format!("no key found: {e}")))?;
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| TheresError::Unknown(format!("corrupt key file: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| TheresError::Unknown("key file has wrong length".to_string()))
}

fn store_key(key_file: &Path, key: &[u8; KEY_LEN]) -> Result<(), TheresError> {
    let encoded = BASE64.encode(key);
    if let Ok(entry) = keychain_entry() {
        if entry.set_password(&encoded).is_ok() {
            return Ok(());
        }
    }
    write_0600(key_file, &encoded)
}

#[cfg(unix)]
fn write_0600(path: &Path, contents: &str) -> Result<(), TheresError> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| TheresError::Unknown(format!("could not create {parent:?}: {e}")))?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| TheresError::Unknown(format!("could not open {path:?}: {e}")))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| TheresError::Unknown(format!("could not write {path:?}: {e}")))
}

#[cfg(not(unix))]
fn write_0600(path: &Path, contents: &str) -> Result<(), TheresError> {
    std::fs::write(path, contents)
        .map_err(|e| TheresError::Unknown(format!("could not write {path:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> EncryptionService {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        EncryptionService::from_key(&key)
    }

    #[tokio::test]
    async fn round_trips_arbitrary_strings() {
        let service = test_service();
        for s in ["", "hello world", "sk-ant-api03-abcdef", "🔒 unicode"] {
            let encrypted = service.encrypt(s).await.unwrap();
            let decrypted = service.decrypt(&encrypted).await.unwrap();
            assert_eq!(decrypted, s);
        }
    }

    #[tokio::test]
    async fn two_encryptions_of_same_plaintext_differ() {
        let service = test_service();
        let a = service.encrypt("same plaintext").await.unwrap();
        let b = service.encrypt("same plaintext").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn is_encrypted_heuristic() {
        let service = test_service();
        let encrypted = service.encrypt("secret").await.unwrap();
        assert!(EncryptionService::is_encrypted(&encrypted));
        assert!(!EncryptionService::is_encrypted("plain text"));
        assert!(!EncryptionService::is_encrypted(""));
    }

    #[tokio::test]
    async fn decrypting_tampered_ciphertext_fails() {
        let service = test_service();
        let mut encrypted = service.encrypt("secret").await.unwrap();
        encrypted.push('x');
        assert!(service.decrypt(&encrypted).await.is_err());
    }

    #[test]
    fn key_round_trips_through_0600_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join(".encryption_key");
        let key1 = acquire_key(&key_file).unwrap();
        let key2 = acquire_key(&key_file).unwrap();
        assert_eq!(key1, key2, "second acquisition should load the persisted key");
    }

    #[test]
    fn fingerprint_is_deterministic_and_distinguishes_keys() {
        let key_a = [7u8; KEY_LEN];
        let key_b = [9u8; KEY_LEN];
        assert_eq!(key_fingerprint(&key_a), key_fingerprint(&key_a));
        assert_eq!(key_fingerprint(&key_a).len(), 8);
        assert_ne!(key_fingerprint(&key_a), key_fingerprint(&key_b));
    }
}
