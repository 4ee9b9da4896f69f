use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{generate_key, EncryptionManager, KEY_SIZE};

/// Durability of the active key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Key is on disk and survives a restart.
    Persisted,
    /// Key could not be written. Content encrypted under it is unreadable
    /// after the process exits.
    InMemoryOnly,
}

struct ActiveKey {
    key: [u8; KEY_SIZE],
    status: KeyStatus,
}

/// Owns the single active symmetric key and its file.
pub struct KeyProvider {
    path: PathBuf,
    active: RwLock<ActiveKey>,
}

impl KeyProvider {
    /// Load the key at `path`, or generate and persist a new one.
    ///
    /// Never fails: if the key cannot be written the provider runs with an
    /// in-memory key and reports [`KeyStatus::InMemoryOnly`].
    pub fn load_or_generate(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let active = match read_key(&path) {
            Some(key) => {
                tracing::info!(path = %path.display(), "Loaded encryption key");
                ActiveKey {
                    key,
                    status: KeyStatus::Persisted,
                }
            }
            None => {
                let key = generate_key();
                let status = persist_key(&path, &key);
                ActiveKey { key, status }
            }
        };

        Self {
            path,
            active: RwLock::new(active),
        }
    }

    /// Provider over a caller-supplied key that is never written anywhere.
    pub fn in_memory(key: [u8; KEY_SIZE]) -> Self {
        Self {
            path: PathBuf::new(),
            active: RwLock::new(ActiveKey {
                key,
                status: KeyStatus::InMemoryOnly,
            }),
        }
    }

    pub fn status(&self) -> KeyStatus {
        self.read().status
    }

    pub fn current_key(&self) -> [u8; KEY_SIZE] {
        self.read().key
    }

    /// Manager bound to the key active right now.
    pub fn manager(&self) -> EncryptionManager {
        EncryptionManager::new(&self.read().key)
    }

    /// Replace the active key with a new random one and try to persist it.
    ///
    /// Rows encrypted under the previous key are not re-encrypted.
    pub fn rotate(&self) -> KeyStatus {
        let key = generate_key();
        let status = if self.path.as_os_str().is_empty() {
            KeyStatus::InMemoryOnly
        } else {
            persist_key(&self.path, &key)
        };

        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        *active = ActiveKey { key, status };
        tracing::info!(?status, "Encryption key rotated");
        status
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ActiveKey> {
        // A poisoned lock still holds a complete key; writers swap it whole.
        self.active.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn read_key(path: &Path) -> Option<[u8; KEY_SIZE]> {
    let text = std::fs::read_to_string(path).ok()?;
    let bytes = match STANDARD.decode(text.trim()) {
        Ok(b) => b,
        Err(_) => {
            tracing::warn!(path = %path.display(), "Key file is not valid base64, generating a new key");
            return None;
        }
    };
    match <[u8; KEY_SIZE]>::try_from(bytes.as_slice()) {
        Ok(key) => Some(key),
        Err(_) => {
            tracing::warn!(
                path = %path.display(),
                len = bytes.len(),
                "Key file has the wrong length, generating a new key"
            );
            None
        }
    }
}

fn persist_key(path: &Path, key: &[u8; KEY_SIZE]) -> KeyStatus {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, STANDARD.encode(key))
    })();

    match result {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Generated and stored a new encryption key");
            KeyStatus::Persisted
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not persist encryption key, continuing with an in-memory key"
            );
            KeyStatus::InMemoryOnly
        }
    }
}
