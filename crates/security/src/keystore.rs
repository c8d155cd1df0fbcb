//! Encrypted keystore
//!
//! A machine-encrypted JSON map of key-id → base64 key, persisted at
//! `Security/keystore.dat` under the warehouse root. Encryption is
//! AES-256-GCM with a fresh random nonce per write; the master key comes
//! from the `SILO_MASTER_KEY` environment variable as base64-encoded 32
//! bytes.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use silo_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable carrying the base64-encoded 32-byte master key.
pub const MASTER_KEY_ENV: &str = "SILO_MASTER_KEY";

const KEYSTORE_SUBPATH: &str = "Security/keystore.dat";

#[derive(Serialize, Deserialize)]
struct KeystoreFile {
    nonce: String,
    data: String,
}

/// Encrypted key-id → key map.
pub struct Keystore {
    path: PathBuf,
    cipher: Aes256Gcm,
    entries: HashMap<String, Vec<u8>>,
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("path", &self.path)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Keystore {
    /// Open (or initialize) the keystore under `root`, reading the master
    /// key from [`MASTER_KEY_ENV`].
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` when the environment variable is missing or
    /// not 32 base64 bytes; `Corruption` when an existing file fails to
    /// decrypt.
    pub fn open(root: &Path) -> Result<Self> {
        let raw = std::env::var(MASTER_KEY_ENV).map_err(|_| {
            Error::InvalidConfiguration(format!("{MASTER_KEY_ENV} is not set"))
        })?;
        Self::open_with_master_key(root, &raw)
    }

    /// Open with an explicit base64 master key (used by tests and callers
    /// that manage the key themselves).
    pub fn open_with_master_key(root: &Path, master_key_b64: &str) -> Result<Self> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(master_key_b64.trim())
            .map_err(|e| Error::InvalidConfiguration(format!("bad master key encoding: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(Error::InvalidConfiguration(format!(
                "master key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

        let path = root.join(KEYSTORE_SUBPATH);
        let entries = if path.exists() {
            let file: KeystoreFile = serde_json::from_slice(&std::fs::read(&path)?)?;
            let nonce_bytes = base64::engine::general_purpose::STANDARD
                .decode(&file.nonce)
                .map_err(|e| Error::Corruption(format!("bad keystore nonce: {e}")))?;
            let ciphertext = base64::engine::general_purpose::STANDARD
                .decode(&file.data)
                .map_err(|e| Error::Corruption(format!("bad keystore payload: {e}")))?;
            let plaintext = cipher
                .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
                .map_err(|_| Error::Corruption("keystore failed to decrypt".into()))?;
            let decoded: HashMap<String, String> = serde_json::from_slice(&plaintext)?;
            decoded
                .into_iter()
                .map(|(id, b64)| {
                    base64::engine::general_purpose::STANDARD
                        .decode(&b64)
                        .map(|bytes| (id.clone(), bytes))
                        .map_err(|e| Error::Corruption(format!("bad key entry {id}: {e}")))
                })
                .collect::<Result<_>>()?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cipher,
            entries,
        })
    }

    /// Fetch a key by id.
    pub fn get(&self, id: &str) -> Option<&[u8]> {
        self.entries.get(id).map(|v| v.as_slice())
    }

    /// Insert or replace a key and persist.
    pub fn put(&mut self, id: &str, key: &[u8]) -> Result<()> {
        self.entries.insert(id.to_string(), key.to_vec());
        self.persist()
    }

    /// Remove a key and persist. Missing ids are not an error.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        self.entries.remove(id);
        self.persist()
    }

    /// Ids of all stored keys.
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn persist(&self) -> Result<()> {
        let encoded: HashMap<&String, String> = self
            .entries
            .iter()
            .map(|(id, key)| {
                (
                    id,
                    base64::engine::general_purpose::STANDARD.encode(key),
                )
            })
            .collect();
        let plaintext = serde_json::to_vec(&encoded)?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| Error::Internal("keystore encryption failed".into()))?;

        let file = KeystoreFile {
            nonce: base64::engine::general_purpose::STANDARD.encode(nonce),
            data: base64::engine::general_purpose::STANDARD.encode(ciphertext),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
