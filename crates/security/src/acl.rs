//! Container access control
//!
//! ACL evaluation is a pure function returning `Result<(), Error>`; callers
//! never observe control flow through exceptions. The order is normative:
//!
//! 1. SystemAdmin callers are allowed.
//! 2. A missing container reports `NotFound`, never `Denied`; private
//!    containers' existence is not disclosed.
//! 3. An explicit user entry of `None` is a ban and denies immediately,
//!    regardless of role grants.
//! 4. Otherwise the effective permission is the maximum of the user entry,
//!    the caller's role entries, and `Role:Everyone`, compared against the
//!    requirement under `None < Read < Write < Delete < FullControl`.

use dashmap::DashMap;
use silo_core::{AclSubject, Container, ContainerId, Error, Permission, Result, UserId};
use tracing::debug;

/// Identity facts the evaluator needs about a caller.
#[derive(Debug, Clone)]
pub struct Caller<'a> {
    /// User id
    pub user: UserId,
    /// Role names held by the user
    pub roles: &'a [String],
    /// Bypasses evaluation entirely
    pub system_admin: bool,
}

/// Container registry with ACL evaluation.
#[derive(Debug, Default)]
pub struct AclEngine {
    containers: DashMap<ContainerId, Container>,
    by_name: DashMap<String, ContainerId>,
}

/// Name of the bootstrap public container.
pub const PUBLIC_CONTAINER: &str = "public";

impl AclEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with the default `public` container owned by
    /// `bootstrap_owner`, readable by `Role:Everyone`.
    pub fn bootstrap(bootstrap_owner: UserId) -> Self {
        let engine = Self::new();
        let mut public = Container::new(PUBLIC_CONTAINER, bootstrap_owner);
        public.acl.insert(AclSubject::Everyone, Permission::Read);
        engine.register(public);
        engine
    }

    /// Insert a pre-built container record.
    pub fn register(&self, container: Container) {
        self.by_name.insert(container.name.clone(), container.id);
        self.containers.insert(container.id, container);
    }

    /// Create a container owned by `owner`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when the name is taken.
    pub fn create_container(&self, name: &str, owner: UserId) -> Result<Container> {
        if self.by_name.contains_key(name) {
            return Err(Error::already_exists(format!("container {name}")));
        }
        let container = Container::new(name, owner);
        self.register(container.clone());
        Ok(container)
    }

    /// Fetch a container by id.
    pub fn get(&self, id: ContainerId) -> Result<Container> {
        self.containers
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| Error::not_found(format!("container {id}")))
    }

    /// Fetch a container by name.
    pub fn find_by_name(&self, name: &str) -> Result<Container> {
        let id = self
            .by_name
            .get(name)
            .map(|e| *e.value())
            .ok_or_else(|| Error::not_found(format!("container {name}")))?;
        self.get(id)
    }

    /// All registered containers.
    pub fn list(&self) -> Vec<Container> {
        self.containers.iter().map(|e| e.value().clone()).collect()
    }

    /// Set or replace an ACL entry.
    ///
    /// Granting `Permission::None` records an explicit ban. The container's
    /// invariant is preserved: the last `FullControl` entry cannot be
    /// downgraded.
    pub fn grant(
        &self,
        container: ContainerId,
        subject: AclSubject,
        permission: Permission,
    ) -> Result<()> {
        let mut entry = self
            .containers
            .get_mut(&container)
            .ok_or_else(|| Error::not_found(format!("container {container}")))?;
        let is_last_full_control = permission < Permission::FullControl
            && entry.acl.get(&subject) == Some(&Permission::FullControl)
            && entry
                .acl
                .values()
                .filter(|p| **p == Permission::FullControl)
                .count()
                == 1;
        if is_last_full_control {
            return Err(Error::Conflict(format!(
                "container {container} must keep at least one FullControl entry"
            )));
        }
        entry.acl.insert(subject, permission);
        Ok(())
    }

    /// Remove an ACL entry.
    pub fn revoke(&self, container: ContainerId, subject: &AclSubject) -> Result<()> {
        let mut entry = self
            .containers
            .get_mut(&container)
            .ok_or_else(|| Error::not_found(format!("container {container}")))?;
        if entry.acl.get(subject) == Some(&Permission::FullControl)
            && entry
                .acl
                .values()
                .filter(|p| **p == Permission::FullControl)
                .count()
                == 1
        {
            return Err(Error::Conflict(format!(
                "container {container} must keep at least one FullControl entry"
            )));
        }
        entry.acl.remove(subject);
        Ok(())
    }

    /// Evaluate whether `caller` holds `required` on `container`.
    pub fn evaluate(
        &self,
        caller: &Caller<'_>,
        container: ContainerId,
        required: Permission,
    ) -> Result<()> {
        if caller.system_admin {
            return Ok(());
        }

        let record = self
            .containers
            .get(&container)
            .ok_or_else(|| Error::not_found(format!("container {container}")))?;
        let acl = &record.acl;

        let mut effective = Permission::None;

        if let Some(user_entry) = acl.get(&AclSubject::User(caller.user)) {
            if *user_entry == Permission::None {
                debug!(user = %caller.user, %container, "explicit ACL ban");
                return Err(Error::Denied(format!(
                    "user is banned from container {container}"
                )));
            }
            effective = *user_entry;
        }
        if effective >= required {
            return Ok(());
        }

        for role in caller.roles {
            if let Some(role_entry) = acl.get(&AclSubject::Role(role.clone())) {
                effective = effective.max(*role_entry);
                if effective >= required {
                    return Ok(());
                }
            }
        }

        if let Some(everyone) = acl.get(&AclSubject::Everyone) {
            effective = effective.max(*everyone);
        }

        if effective >= required {
            Ok(())
        } else {
            Err(Error::Denied(format!(
                "{required:?} not granted on container {container}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::ErrorKind;

    fn caller<'a>(user: UserId, roles: &'a [String]) -> Caller<'a> {
        Caller {
            user,
            roles,
            system_admin: false,
        }
    }

    #[test]
    fn test_owner_has_full_control() {
        let owner = UserId::new();
        let engine = AclEngine::new();
        let c = engine.create_container("data", owner).unwrap();
        engine
            .evaluate(&caller(owner, &[]), c.id, Permission::FullControl)
            .unwrap();
    }

    #[test]
    fn test_missing_container_is_not_found_not_denied() {
        let engine = AclEngine::new();
        let err = engine
            .evaluate(&caller(UserId::new(), &[]), ContainerId::new(), Permission::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_explicit_ban_beats_role_grant() {
        let owner = UserId::new();
        let alice = UserId::new();
        let engine = AclEngine::new();
        let c = engine.create_container("data", owner).unwrap();
        engine
            .grant(c.id, AclSubject::User(alice), Permission::None)
            .unwrap();
        engine
            .grant(c.id, AclSubject::Role("admins".into()), Permission::FullControl)
            .unwrap();

        let roles = vec!["admins".to_string()];
        let err = engine
            .evaluate(&caller(alice, &roles), c.id, Permission::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Denied);
    }

    #[test]
    fn test_role_union_takes_maximum() {
        let owner = UserId::new();
        let bob = UserId::new();
        let engine = AclEngine::new();
        let c = engine.create_container("data", owner).unwrap();
        engine
            .grant(c.id, AclSubject::Role("readers".into()), Permission::Read)
            .unwrap();
        engine
            .grant(c.id, AclSubject::Role("writers".into()), Permission::Write)
            .unwrap();

        let roles = vec!["readers".to_string(), "writers".to_string()];
        engine
            .evaluate(&caller(bob, &roles), c.id, Permission::Write)
            .unwrap();
        let err = engine
            .evaluate(&caller(bob, &roles), c.id, Permission::Delete)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Denied);
    }

    #[test]
    fn test_everyone_grant_applies_without_user_entry() {
        // A role ban `Role:Everyone → None` is not a user entry, so the
        // public grant path still runs and Read is allowed
        let owner = UserId::new();
        let engine = AclEngine::bootstrap(owner);
        let public = engine.find_by_name(PUBLIC_CONTAINER).unwrap();
        engine
            .evaluate(&caller(UserId::new(), &[]), public.id, Permission::Read)
            .unwrap();
        let err = engine
            .evaluate(&caller(UserId::new(), &[]), public.id, Permission::Write)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Denied);
    }

    #[test]
    fn test_system_admin_bypasses() {
        let engine = AclEngine::new();
        let c = engine.create_container("data", UserId::new()).unwrap();
        let admin = Caller {
            user: UserId::new(),
            roles: &[],
            system_admin: true,
        };
        engine.evaluate(&admin, c.id, Permission::FullControl).unwrap();
    }

    #[test]
    fn test_user_grant_short_circuits_before_roles() {
        let owner = UserId::new();
        let carol = UserId::new();
        let engine = AclEngine::new();
        let c = engine.create_container("data", owner).unwrap();
        engine
            .grant(c.id, AclSubject::User(carol), Permission::Write)
            .unwrap();
        // No roles needed
        engine
            .evaluate(&caller(carol, &[]), c.id, Permission::Write)
            .unwrap();
    }

    #[test]
    fn test_last_full_control_is_protected() {
        let owner = UserId::new();
        let engine = AclEngine::new();
        let c = engine.create_container("data", owner).unwrap();
        let err = engine
            .grant(c.id, AclSubject::User(owner), Permission::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = engine
            .revoke(c.id, &AclSubject::User(owner))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // A second FullControl entry unlocks the first
        engine
            .grant(c.id, AclSubject::Role("ops".into()), Permission::FullControl)
            .unwrap();
        engine
            .grant(c.id, AclSubject::User(owner), Permission::Read)
            .unwrap();
    }

    #[test]
    fn test_duplicate_container_name_rejected() {
        let engine = AclEngine::new();
        engine.create_container("data", UserId::new()).unwrap();
        let err = engine.create_container("data", UserId::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
}
