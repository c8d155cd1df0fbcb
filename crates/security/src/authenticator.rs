//! Authenticator
//!
//! Owns the user table, session store and API-key store, and is the
//! authoritative authorization entry point. Authorization is a two-layer
//! gate: the coarse role tier first (a request outside the tier's allowed
//! set is denied without consulting ACLs), then the container ACL when an
//! engine is passed.
//!
//! Five consecutive password failures lock the account until an
//! administrator reactivates it.

use dashmap::DashMap;
use silo_core::{ContainerId, Error, Permission, Result, RoleTier, UserId};
use tracing::{debug, warn};

use crate::acl::{AclEngine, Caller};
use crate::apikey::{ApiKey, ApiKeyStore};
use crate::password::PasswordHash;
use crate::session::{AuthMethod, Session, SessionStore};

/// Consecutive failures that lock an account.
pub const LOCKOUT_THRESHOLD: u32 = 5;

/// Stored user record.
#[derive(Debug, Clone)]
pub struct User {
    /// Stable identifier
    pub id: UserId,
    /// Unique username
    pub username: String,
    /// Password record
    pub password: PasswordHash,
    /// Role tier
    pub tier: RoleTier,
    /// Role names for ACL evaluation
    pub roles: Vec<String>,
    /// Cleared when the account is locked out
    pub active: bool,
    /// Consecutive failed password attempts
    pub failed_attempts: u32,
}

/// Password/API-key authenticator with session issuance.
pub struct Authenticator {
    users: DashMap<UserId, User>,
    by_name: DashMap<String, UserId>,
    sessions: SessionStore,
    api_keys: ApiKeyStore,
}

impl Authenticator {
    /// Create an authenticator with the default session TTL.
    pub fn new() -> Self {
        Self::with_sessions(SessionStore::new())
    }

    /// Create an authenticator over a custom session store.
    pub fn with_sessions(sessions: SessionStore) -> Self {
        Self {
            users: DashMap::new(),
            by_name: DashMap::new(),
            sessions,
            api_keys: ApiKeyStore::new(),
        }
    }

    /// Session store, for housekeeping sweeps.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// API-key store.
    pub fn api_keys(&self) -> &ApiKeyStore {
        &self.api_keys
    }

    /// Register a new user.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when the username is taken.
    pub fn register_user(
        &self,
        username: &str,
        password: &str,
        tier: RoleTier,
        roles: Vec<String>,
    ) -> Result<User> {
        if self.by_name.contains_key(username) {
            return Err(Error::already_exists(format!("user {username}")));
        }
        let user = User {
            id: UserId::new(),
            username: username.to_string(),
            password: PasswordHash::new(password),
            tier,
            roles,
            active: true,
            failed_attempts: 0,
        };
        self.by_name.insert(user.username.clone(), user.id);
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Fetch a user by id.
    pub fn user(&self, id: UserId) -> Result<User> {
        self.users
            .get(&id)
            .map(|u| u.clone())
            .ok_or_else(|| Error::not_found(format!("user {id}")))
    }

    /// Fetch a user by name.
    pub fn user_by_name(&self, username: &str) -> Result<User> {
        let id = self
            .by_name
            .get(username)
            .map(|e| *e.value())
            .ok_or_else(|| Error::not_found(format!("user {username}")))?;
        self.user(id)
    }

    /// Authenticate with username and password; issues a session on success.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` on bad credentials or a locked account. The error
    /// message does not reveal which of the two it was for unknown users.
    pub fn authenticate_password(&self, username: &str, password: &str) -> Result<Session> {
        let Some(id) = self.by_name.get(username).map(|e| *e.value()) else {
            return Err(Error::Unauthenticated("invalid credentials".into()));
        };
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| Error::Unauthenticated("invalid credentials".into()))?;

        if !user.active {
            return Err(Error::Unauthenticated(format!(
                "account {username} is locked"
            )));
        }

        if user.password.verify(password)? {
            user.failed_attempts = 0;
            let session = self.sessions.create(
                user.id,
                user.username.clone(),
                user.tier,
                user.roles.clone(),
                AuthMethod::Password,
            );
            debug!(username, "password authentication succeeded");
            Ok(session)
        } else {
            user.failed_attempts += 1;
            if user.failed_attempts >= LOCKOUT_THRESHOLD {
                user.active = false;
                warn!(username, "account locked after repeated failures");
            }
            Err(Error::Unauthenticated("invalid credentials".into()))
        }
    }

    /// Administrative unlock: reactivates the account and clears the failure
    /// counter.
    pub fn reactivate(&self, id: UserId) -> Result<()> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("user {id}")))?;
        user.active = true;
        user.failed_attempts = 0;
        Ok(())
    }

    /// Issue an API key owned by `owner`.
    pub fn create_api_key(
        &self,
        name: &str,
        owner: UserId,
        tier: RoleTier,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<ApiKey> {
        // Owner must exist; keys are not free-floating credentials
        let _ = self.user(owner)?;
        Ok(self.api_keys.create(name, owner, tier, expires_at))
    }

    /// Authenticate with an API key secret; issues a session with the
    /// username `api:<name>`.
    pub fn authenticate_api_key(&self, secret: &str) -> Result<Session> {
        let key = self.api_keys.authenticate(secret)?;
        Ok(self.sessions.create(
            key.owner,
            format!("api:{}", key.name),
            key.tier,
            Vec::new(),
            AuthMethod::ApiKey,
        ))
    }

    /// Validate a session token.
    pub fn validate_session(&self, token: &str) -> Option<Session> {
        self.sessions.validate(token)
    }

    /// Authoritative authorization entry point.
    ///
    /// The role tier is checked first: `Admin` bypasses, `PowerUser` allows
    /// Read/Write/Delete, `User` allows Read/Write, `ReadOnly` allows Read.
    /// When `acl` is given, the container ACL must also allow the request.
    pub fn authorize(
        &self,
        session: &Session,
        requested: Permission,
        acl: Option<(&AclEngine, ContainerId)>,
    ) -> Result<()> {
        if session.is_expired() {
            return Err(Error::Unauthenticated("session expired".into()));
        }
        if !session.tier.allows(requested) {
            return Err(Error::Denied(format!(
                "{:?} tier does not allow {requested:?}",
                session.tier
            )));
        }
        if let Some((engine, container)) = acl {
            let caller = Caller {
                user: session.user_id,
                roles: &session.roles,
                system_admin: session.tier == RoleTier::Admin,
            };
            engine.evaluate(&caller, container, requested)?;
        }
        Ok(())
    }

    /// Legacy permission-list check.
    ///
    /// Preserved for back-compat with callers that still read the flat
    /// `Session::permissions` list. New call sites use [`Self::authorize`].
    #[deprecated(note = "use authorize(); the flat permission list is a legacy surface")]
    pub fn check_permission_list(&self, session: &Session, requested: Permission) -> bool {
        session.permissions.contains(&requested)
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::ErrorKind;

    fn auth_with_user(tier: RoleTier) -> (Authenticator, User) {
        let auth = Authenticator::new();
        let user = auth
            .register_user("alice", "s3cret", tier, vec!["devs".into()])
            .unwrap();
        (auth, user)
    }

    #[test]
    fn test_password_authentication_issues_session() {
        let (auth, user) = auth_with_user(RoleTier::User);
        let session = auth.authenticate_password("alice", "s3cret").unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.username, "alice");
        assert!(auth.validate_session(&session.id).is_some());
    }

    #[test]
    fn test_wrong_password_rejected() {
        let (auth, _) = auth_with_user(RoleTier::User);
        let err = auth.authenticate_password("alice", "wrong").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        let err = auth.authenticate_password("nobody", "pw").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn test_lockout_after_five_failures_and_reactivation() {
        let (auth, user) = auth_with_user(RoleTier::User);
        for _ in 0..5 {
            let _ = auth.authenticate_password("alice", "wrong");
        }
        // Correct password no longer helps
        let err = auth.authenticate_password("alice", "s3cret").unwrap_err();
        assert!(err.to_string().contains("locked"));

        auth.reactivate(user.id).unwrap();
        auth.authenticate_password("alice", "s3cret").unwrap();
    }

    #[test]
    fn test_failure_counter_resets_on_success() {
        let (auth, _) = auth_with_user(RoleTier::User);
        for _ in 0..4 {
            let _ = auth.authenticate_password("alice", "wrong");
        }
        auth.authenticate_password("alice", "s3cret").unwrap();
        for _ in 0..4 {
            let _ = auth.authenticate_password("alice", "wrong");
        }
        // Still not locked: the streak restarted
        auth.authenticate_password("alice", "s3cret").unwrap();
    }

    #[test]
    fn test_api_key_session_username() {
        let (auth, user) = auth_with_user(RoleTier::PowerUser);
        let key = auth
            .create_api_key("ci-deploy", user.id, RoleTier::User, None)
            .unwrap();
        let session = auth.authenticate_api_key(&key.secret).unwrap();
        assert_eq!(session.username, "api:ci-deploy");
        assert_eq!(session.tier, RoleTier::User);
        assert_eq!(session.auth_method, AuthMethod::ApiKey);
    }

    #[test]
    fn test_revoked_key_spares_existing_sessions() {
        let (auth, user) = auth_with_user(RoleTier::User);
        let key = auth
            .create_api_key("ci", user.id, RoleTier::User, None)
            .unwrap();
        let session = auth.authenticate_api_key(&key.secret).unwrap();
        auth.api_keys().revoke(key.id).unwrap();

        // New authentications fail, the issued session survives
        assert!(auth.authenticate_api_key(&key.secret).is_err());
        assert!(auth.validate_session(&session.id).is_some());
    }

    #[test]
    fn test_tier_gate_denies_before_acl() {
        let (auth, _) = auth_with_user(RoleTier::ReadOnly);
        let session = auth.authenticate_password("alice", "s3cret").unwrap();
        // No ACL engine involved; the tier alone denies
        let err = auth
            .authorize(&session, Permission::Write, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Denied);
        auth.authorize(&session, Permission::Read, None).unwrap();
    }

    #[test]
    fn test_two_layer_authorize_with_acl() {
        let (auth, user) = auth_with_user(RoleTier::User);
        let session = auth.authenticate_password("alice", "s3cret").unwrap();
        let acl = AclEngine::new();
        let container = acl.create_container("data", UserId::new()).unwrap();

        // Tier allows Write, but the ACL has no grant for alice
        let err = auth
            .authorize(&session, Permission::Write, Some((&acl, container.id)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Denied);

        acl.grant(
            container.id,
            silo_core::AclSubject::User(user.id),
            Permission::Write,
        )
        .unwrap();
        auth.authorize(&session, Permission::Write, Some((&acl, container.id)))
            .unwrap();
    }

    #[test]
    fn test_admin_tier_bypasses_acl() {
        let (auth, _) = auth_with_user(RoleTier::Admin);
        let session = auth.authenticate_password("alice", "s3cret").unwrap();
        let acl = AclEngine::new();
        let container = acl.create_container("data", UserId::new()).unwrap();
        auth.authorize(&session, Permission::FullControl, Some((&acl, container.id)))
            .unwrap();
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_permission_list() {
        let (auth, _) = auth_with_user(RoleTier::User);
        let session = auth.authenticate_password("alice", "s3cret").unwrap();
        assert!(auth.check_permission_list(&session, Permission::Read));
        assert!(!auth.check_permission_list(&session, Permission::Delete));
    }
}
