//! Password hashing
//!
//! PBKDF2-HMAC-SHA256 with a per-user 32-byte random salt, 100 000
//! iterations and 32-byte output. The algorithm is labeled in the stored
//! record so a future migration to Argon2id can coexist with old records.
//! Comparison is constant-time.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use silo_core::{Error, Result};

/// Algorithm label written into every record produced by [`PasswordHash::new`].
pub const PBKDF2_SHA256: &str = "PBKDF2-HMAC-SHA256";

/// Minimum iteration count accepted on verification.
pub const MIN_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 32;
const HASH_LEN: usize = 32;

/// Stored password record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    /// Algorithm label
    pub algorithm: String,
    /// Per-user random salt (hex)
    pub salt: String,
    /// Iteration count
    pub iterations: u32,
    /// Derived key (hex)
    pub hash: String,
}

impl PasswordHash {
    /// Hash `password` with a fresh random salt.
    pub fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut derived = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, MIN_ITERATIONS, &mut derived);
        Self {
            algorithm: PBKDF2_SHA256.to_string(),
            salt: hex::encode(salt),
            iterations: MIN_ITERATIONS,
            hash: hex::encode(derived),
        }
    }

    /// Verify `password` against this record in constant time.
    ///
    /// # Errors
    ///
    /// `Internal` when the record is malformed (unknown algorithm, bad hex,
    /// or an iteration count below the accepted minimum).
    pub fn verify(&self, password: &str) -> Result<bool> {
        if self.algorithm != PBKDF2_SHA256 {
            return Err(Error::Internal(format!(
                "unsupported password algorithm: {}",
                self.algorithm
            )));
        }
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::Internal(format!(
                "iteration count {} below minimum",
                self.iterations
            )));
        }
        let salt = hex::decode(&self.salt)
            .map_err(|e| Error::Internal(format!("bad salt encoding: {e}")))?;
        let stored = hex::decode(&self.hash)
            .map_err(|e| Error::Internal(format!("bad hash encoding: {e}")))?;

        let mut derived = vec![0u8; stored.len().max(1)];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, self.iterations, &mut derived);
        Ok(constant_time_eq(&derived, &stored))
    }
}

/// Constant-time byte comparison: the full length is always walked and the
/// differences folded into one accumulator.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
