//! API keys
//!
//! Out-of-band credentials: 32 random bytes rendered in URL-safe base64 with
//! a recognizable `sk_` prefix. Each key carries a role tier. Revocation is
//! immediate (the key never authenticates again), but sessions already
//! derived from it are not retroactively revoked.

use base64::Engine as _;
use dashmap::DashMap;
use rand::RngCore;
use silo_core::{ApiKeyId, Error, Result, RoleTier, UserId};

use crate::password::constant_time_eq;

/// Prefix identifying Silo API keys in logs and config files.
pub const API_KEY_PREFIX: &str = "sk_";

/// Stored API key record.
#[derive(Debug, Clone)]
pub struct ApiKey {
    /// Stable identifier
    pub id: ApiKeyId,
    /// Human-readable name; sessions use the username `api:<name>`
    pub name: String,
    /// The opaque secret, prefix included
    pub secret: String,
    /// Owning user
    pub owner: UserId,
    /// Role tier granted to sessions derived from this key
    pub tier: RoleTier,
    /// Creation time
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Optional expiry
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Revocation time, when revoked
    pub revoked_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Active flag; cleared on revocation
    pub active: bool,
    /// Successful authentications with this key
    pub usage_count: u64,
}

impl ApiKey {
    fn is_usable(&self) -> bool {
        self.active
            && self.revoked_at.is_none()
            && self
                .expires_at
                .map_or(true, |exp| chrono::Utc::now() < exp)
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{API_KEY_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// Concurrent API-key store.
#[derive(Debug, Default)]
pub struct ApiKeyStore {
    keys: DashMap<ApiKeyId, ApiKey>,
}

impl ApiKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new key. The returned record is the only place the secret is
    /// handed out.
    pub fn create(
        &self,
        name: impl Into<String>,
        owner: UserId,
        tier: RoleTier,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> ApiKey {
        let key = ApiKey {
            id: ApiKeyId::new(),
            name: name.into(),
            secret: generate_secret(),
            owner,
            tier,
            created_at: chrono::Utc::now(),
            expires_at,
            revoked_at: None,
            active: true,
            usage_count: 0,
        };
        self.keys.insert(key.id, key.clone());
        key
    }

    /// Authenticate a presented secret; bumps the usage counter on success.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for unknown, revoked or expired keys.
    pub fn authenticate(&self, secret: &str) -> Result<ApiKey> {
        for mut entry in self.keys.iter_mut() {
            if constant_time_eq(entry.secret.as_bytes(), secret.as_bytes()) {
                if !entry.is_usable() {
                    return Err(Error::Unauthenticated("API key is not active".into()));
                }
                entry.usage_count += 1;
                return Ok(entry.clone());
            }
        }
        Err(Error::Unauthenticated("unknown API key".into()))
    }

    /// Revoke a key immediately.
    pub fn revoke(&self, id: ApiKeyId) -> Result<()> {
        let mut key = self
            .keys
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("api key {id}")))?;
        key.active = false;
        key.revoked_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Fetch a key record by id.
    pub fn get(&self, id: ApiKeyId) -> Result<ApiKey> {
        self.keys
            .get(&id)
            .map(|k| k.clone())
            .ok_or_else(|| Error::not_found(format!("api key {id}")))
    }

    /// All key records.
    pub fn list(&self) -> Vec<ApiKey> {
        self.keys.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::ErrorKind;

    #[test]
    fn test_secret_shape() {
        let store = ApiKeyStore::new();
        let key = store.create("ci", UserId::new(), RoleTier::User, None);
        assert!(key.secret.starts_with(API_KEY_PREFIX));
        // 32 bytes in unpadded URL-safe base64
        assert_eq!(key.secret.len(), API_KEY_PREFIX.len() + 43);
        assert!(!key.secret[API_KEY_PREFIX.len()..].contains(['+', '/', '=']));
    }

    #[test]
    fn test_authenticate_bumps_usage() {
        let store = ApiKeyStore::new();
        let key = store.create("ci", UserId::new(), RoleTier::PowerUser, None);
        let authed = store.authenticate(&key.secret).unwrap();
        assert_eq!(authed.id, key.id);
        assert_eq!(authed.usage_count, 1);
        store.authenticate(&key.secret).unwrap();
        assert_eq!(store.get(key.id).unwrap().usage_count, 2);
    }

    #[test]
    fn test_unknown_secret_rejected() {
        let store = ApiKeyStore::new();
        let err = store.authenticate("sk_nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn test_revoked_key_never_authenticates_again() {
        let store = ApiKeyStore::new();
        let key = store.create("ci", UserId::new(), RoleTier::User, None);
        store.revoke(key.id).unwrap();
        let err = store.authenticate(&key.secret).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        let record = store.get(key.id).unwrap();
        assert!(!record.active);
        assert!(record.revoked_at.is_some());
    }

    #[test]
    fn test_expired_key_rejected() {
        let store = ApiKeyStore::new();
        let key = store.create(
            "old",
            UserId::new(),
            RoleTier::User,
            Some(chrono::Utc::now() - chrono::Duration::seconds(1)),
        );
        let err = store.authenticate(&key.secret).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }
}
