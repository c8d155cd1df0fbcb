//! Sessions
//!
//! A session is proof of authenticated identity with a bounded lifetime:
//! a 128-bit random opaque token, 24-hour expiry by default. Validation
//! rejects expired entries and removes them from the store.

use dashmap::DashMap;
use rand::RngCore;
use silo_core::{Permission, RoleTier, UserId};
use std::time::Duration;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How the session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Username + password
    Password,
    /// API key
    ApiKey,
}

/// Authenticated identity with a bounded lifetime.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque 128-bit token (hex)
    pub id: String,
    /// Authenticated user
    pub user_id: UserId,
    /// Username; `api:<name>` for API-key sessions
    pub username: String,
    /// Role tier for the coarse authorization gate
    pub tier: RoleTier,
    /// Role names for ACL evaluation
    pub roles: Vec<String>,
    /// Legacy flat permission list; kept for back-compat only
    pub permissions: Vec<Permission>,
    /// Creation time
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Expiry time
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// Last validation time
    pub last_activity: chrono::DateTime<chrono::Utc>,
    /// Authentication method
    pub auth_method: AuthMethod,
}

impl Session {
    /// Whether this session is past its expiry.
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now() >= self.expires_at
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Concurrent session store.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store with the default 24-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    /// Create a store with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Issue a session for an authenticated identity.
    pub fn create(
        &self,
        user_id: UserId,
        username: impl Into<String>,
        tier: RoleTier,
        roles: Vec<String>,
        auth_method: AuthMethod,
    ) -> Session {
        let now = chrono::Utc::now();
        let permissions = legacy_permissions(tier);
        let session = Session {
            id: random_token(),
            user_id,
            username: username.into(),
            tier,
            roles,
            permissions,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.ttl).expect("ttl fits"),
            last_activity: now,
            auth_method,
        };
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Validate a token: expired sessions are removed and `None` returned.
    /// Valid sessions get their `last_activity` refreshed.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let expired = match self.sessions.get_mut(token) {
            Some(mut entry) => {
                if entry.is_expired() {
                    true
                } else {
                    entry.last_activity = chrono::Utc::now();
                    return Some(entry.clone());
                }
            }
            None => return None,
        };
        if expired {
            self.sessions.remove(token);
        }
        None
    }

    /// Destroy one session (logout or administrative revocation).
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Destroy every session belonging to `user`.
    pub fn revoke_user(&self, user: UserId) -> usize {
        let tokens: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().user_id == user)
            .map(|e| e.key().clone())
            .collect();
        for token in &tokens {
            self.sessions.remove(token);
        }
        tokens.len()
    }

    /// Sweep expired sessions; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired());
        before - self.sessions.len()
    }

    /// Number of live (unswept) sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The obsolete flat permission list derived from a tier. Preserved for
/// back-compat with callers that still read `Session::permissions`; new call
/// sites use `Authenticator::authorize` instead.
fn legacy_permissions(tier: RoleTier) -> Vec<Permission> {
    match tier {
        RoleTier::Admin => vec![
            Permission::Read,
            Permission::Write,
            Permission::Delete,
            Permission::FullControl,
        ],
        RoleTier::PowerUser => vec![Permission::Read, Permission::Write, Permission::Delete],
        RoleTier::User => vec![Permission::Read, Permission::Write],
        RoleTier::ReadOnly => vec![Permission::Read],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_validate() {
        let store = SessionStore::new();
        let session = store.create(
            UserId::new(),
            "alice",
            RoleTier::User,
            vec!["devs".into()],
            AuthMethod::Password,
        );
        assert_eq!(session.id.len(), 32); // 128 bits as hex

        let validated = store.validate(&session.id).unwrap();
        assert_eq!(validated.username, "alice");
        assert!(validated.last_activity >= session.last_activity);
        assert!(store.validate("bogus").is_none());
    }

    #[test]
    fn test_expired_session_removed_on_validation() {
        let store = SessionStore::with_ttl(Duration::ZERO);
        let session = store.create(
            UserId::new(),
            "bob",
            RoleTier::User,
            vec![],
            AuthMethod::Password,
        );
        assert!(store.validate(&session.id).is_none());
        // Removed, not just rejected
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_revoke() {
        let store = SessionStore::new();
        let session = store.create(
            UserId::new(),
            "carol",
            RoleTier::ReadOnly,
            vec![],
            AuthMethod::Password,
        );
        assert!(store.revoke(&session.id));
        assert!(!store.revoke(&session.id));
        assert!(store.validate(&session.id).is_none());
    }

    #[test]
    fn test_revoke_user_hits_all_their_sessions() {
        let store = SessionStore::new();
        let user = UserId::new();
        store.create(user, "dave", RoleTier::User, vec![], AuthMethod::Password);
        store.create(user, "dave", RoleTier::User, vec![], AuthMethod::ApiKey);
        store.create(
            UserId::new(),
            "erin",
            RoleTier::User,
            vec![],
            AuthMethod::Password,
        );
        assert_eq!(store.revoke_user(user), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_purge_expired() {
        let short = SessionStore::with_ttl(Duration::ZERO);
        short.create(UserId::new(), "x", RoleTier::User, vec![], AuthMethod::Password);
        short.create(UserId::new(), "y", RoleTier::User, vec![], AuthMethod::Password);
        assert_eq!(short.purge_expired(), 2);
        assert!(short.is_empty());
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = SessionStore::new();
        let a = store.create(UserId::new(), "a", RoleTier::User, vec![], AuthMethod::Password);
        let b = store.create(UserId::new(), "b", RoleTier::User, vec![], AuthMethod::Password);
        assert_ne!(a.id, b.id);
    }
}
