//! Encryption of personal content at rest.
//!
//! Values are sealed with AES-256-GCM. The stored form is
//! `base64(nonce || ciphertext || tag)` so it fits a TEXT column.

mod key_provider;

pub use key_provider::{KeyProvider, KeyStatus};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use crate::error::{AppError, AppResult};

/// Size of the symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the per-call nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Symmetric authenticated encryption bound to one key.
///
/// A manager never changes key. Rotation goes through [`KeyProvider`],
/// which hands out a new manager for the new key.
#[derive(Clone)]
pub struct EncryptionManager {
    cipher: Aes256Gcm,
}

impl EncryptionManager {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> AppResult<String> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| AppError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    /// Reverse of [`encrypt`](Self::encrypt). Fails on bad encoding,
    /// truncation, tampering or a wrong key, without saying which.
    pub fn decrypt(&self, encoded: &str) -> AppResult<Vec<u8>> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|_| AppError::DecryptionFailed)?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(AppError::DecryptionFailed);
        }

        let (nonce, sealed) = raw.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| AppError::DecryptionFailed)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> AppResult<String> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, encoded: &str) -> AppResult<String> {
        String::from_utf8(self.decrypt(encoded)?).map_err(|_| AppError::DecryptionFailed)
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> AppResult<Option<String>> {
        plaintext.map(|p| self.encrypt_str(p)).transpose()
    }

    pub fn decrypt_opt(&self, encoded: Option<&str>) -> AppResult<Option<String>> {
        encoded.map(|e| self.decrypt_str(e)).transpose()
    }
}

/// Fresh random key from the OS generator.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}
