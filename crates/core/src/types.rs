//! Core types for the Silo warehouse
//!
//! This module defines the foundational types:
//! - ManifestId / ContainerId / SnapshotId / UserId: newtype identifiers
//! - ContentHash: SHA-256 content address
//! - Permission / RoleTier: ordered authorization lattices
//! - Manifest / Container: the two primary metadata records
//! - Granularity: the seven snapshot capture levels
//! - CancelToken: cooperative cancellation signal

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier (UUID v4)
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a standard UUID string representation
            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }

            /// Raw bytes of the identifier
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a stored manifest
    ManifestId
}
uuid_id! {
    /// Unique identifier for a container
    ContainerId
}
uuid_id! {
    /// Unique identifier for a snapshot
    SnapshotId
}
uuid_id! {
    /// Unique identifier for a user account
    UserId
}
uuid_id! {
    /// Unique identifier for an API key record
    ApiKeyId
}
uuid_id! {
    /// Unique identifier for a backup
    BackupId
}

/// SHA-256 content address of a blob.
///
/// Content-addressed identity means re-writing identical bytes produces the
/// same hash, which makes storage deduplication-friendly. Rendered as
/// lowercase hex in display contexts and serialized as a hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(#[serde(with = "hex_bytes")] [u8; 32]);

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(de)?;
        let v = hex::decode(&s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl ContentHash {
    /// Hash a byte slice with SHA-256.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(digest.into())
    }

    /// Wrap a raw 32-byte digest.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex digest.
    pub fn parse(s: &str) -> Result<Self> {
        let v = hex::decode(s)
            .map_err(|e| Error::InvalidArgument(format!("bad content hash: {e}")))?;
        let arr: [u8; 32] = v
            .try_into()
            .map_err(|_| Error::InvalidArgument("content hash must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

/// Permission granted on a container, totally ordered.
///
/// `None < Read < Write < Delete < FullControl`. An explicit `None` entry in
/// an ACL is a ban: it denies the subject regardless of any role grants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Permission {
    /// No access (explicit ban when present in an ACL)
    #[default]
    None,
    /// Read objects and snapshots
    Read,
    /// Write new objects
    Write,
    /// Delete objects
    Delete,
    /// Administer the container, including its ACL
    FullControl,
}

/// Coarse role tier gating which permissions may be requested at all.
///
/// `ReadOnly(0) < User(1) < PowerUser(2) < Admin(3)`. The tier check runs
/// before any ACL is consulted; a request outside the tier's allowed set is
/// denied without disclosing container state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum RoleTier {
    /// May only request `Read`
    ReadOnly,
    /// May request `Read` and `Write`
    #[default]
    User,
    /// May request `Read`, `Write` and `Delete`
    PowerUser,
    /// Bypasses the tier gate entirely
    Admin,
}

impl RoleTier {
    /// Whether this tier permits requesting `perm` at all.
    pub fn allows(&self, perm: Permission) -> bool {
        match self {
            RoleTier::Admin => true,
            RoleTier::PowerUser => matches!(
                perm,
                Permission::Read | Permission::Write | Permission::Delete
            ),
            RoleTier::User => matches!(perm, Permission::Read | Permission::Write),
            RoleTier::ReadOnly => perm == Permission::Read,
        }
    }
}

/// Subject of a container ACL entry: a specific user, a named role, or the
/// built-in `Everyone` role.
///
/// Serialized in the legacy string form: the bare user id for users,
/// `Role:<name>` for roles, `Role:Everyone` for the public grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AclSubject {
    /// A specific user id
    User(UserId),
    /// A named role
    Role(String),
    /// Every authenticated or anonymous caller
    Everyone,
}

impl AclSubject {
    /// Parse the string form used in persisted ACLs.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(role) = s.strip_prefix("Role:") {
            if role == "Everyone" {
                Ok(AclSubject::Everyone)
            } else if role.is_empty() {
                Err(Error::InvalidArgument("empty role name in ACL".into()))
            } else {
                Ok(AclSubject::Role(role.to_string()))
            }
        } else {
            UserId::parse(s)
                .map(AclSubject::User)
                .ok_or_else(|| Error::InvalidArgument(format!("bad ACL subject: {s}")))
        }
    }
}

impl fmt::Display for AclSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclSubject::User(id) => write!(f, "{id}"),
            AclSubject::Role(name) => write!(f, "Role:{name}"),
            AclSubject::Everyone => write!(f, "Role:Everyone"),
        }
    }
}

impl Serialize for AclSubject {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> std::result::Result<S::Ok, S::Error> {
        ser.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AclSubject {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        AclSubject::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Metadata record for one stored blob.
///
/// Immutable after creation. The content hash equals the hash of the bytes
/// retrievable from the redundancy engine under this manifest's key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Stable identifier
    pub id: ManifestId,
    /// Owning container
    pub container: ContainerId,
    /// Path relative to the container root, `/`-separated
    pub relative_path: String,
    /// SHA-256 of the stored bytes
    pub content_hash: ContentHash,
    /// Byte length of the blob
    pub size: u64,
    /// Creation time (UTC)
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last modification time (UTC)
    pub modified_at: chrono::DateTime<chrono::Utc>,
}

impl Manifest {
    /// Create a manifest for freshly written bytes.
    pub fn new(container: ContainerId, relative_path: impl Into<String>, bytes: &[u8]) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: ManifestId::new(),
            container,
            relative_path: relative_path.into(),
            content_hash: ContentHash::of(bytes),
            size: bytes.len() as u64,
            created_at: now,
            modified_at: now,
        }
    }

    /// Blob key under which the redundancy engine stores this manifest's bytes.
    pub fn blob_key(&self) -> String {
        self.content_hash.to_hex()
    }
}

/// Named, ACL-bearing grouping of manifests.
///
/// Each container holds at least one `FullControl` entry, typically its
/// creator. Containers are created explicitly and never silently destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Stable identifier
    pub id: ContainerId,
    /// Human-readable name, unique within the warehouse
    pub name: String,
    /// Owner (holds `FullControl` from creation)
    pub owner: UserId,
    /// Whether blob bytes pass through the encryption transformation chain
    pub encrypted: bool,
    /// Whether blob bytes pass through the compression transformation chain
    pub compressed: bool,
    /// Access-control list
    pub acl: HashMap<AclSubject, Permission>,
    /// Creation time (UTC)
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Container {
    /// Create a container owned by `owner`, granting the owner `FullControl`.
    pub fn new(name: impl Into<String>, owner: UserId) -> Self {
        let mut acl = HashMap::new();
        acl.insert(AclSubject::User(owner), Permission::FullControl);
        Self {
            id: ContainerId::new(),
            name: name.into(),
            owner,
            encrypted: false,
            compressed: false,
            acl,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Granularity of a point-in-time snapshot, narrowest to broadest.
///
/// The five middle values differ only in the index query used to select
/// manifests; the capture contract is identical for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    /// Exactly one manifest; target id required
    SingleFile = 1,
    /// One compartment within a partition
    Compartment = 2,
    /// One partition
    Partition = 3,
    /// One storage layer
    StorageLayer = 4,
    /// One storage pool
    StoragePool = 5,
    /// A set of pools
    MultiplePools = 6,
    /// Everything, including `Config/` and `Metadata/` trees
    CompleteInstance = 7,
}

/// Cooperative cancellation signal accepted by every public operation.
///
/// Cloning shares the underlying flag. Cancellation after partial work is
/// reported as `Cancelled`; partially written state is marked failed rather
/// than sealed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to all clones of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Return `Err(Cancelled)` when the token has been signalled.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(what.to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_of_known_vector() {
        // SHA-256("abc")
        let h = ContentHash::of(b"abc");
        assert_eq!(
            h.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_content_hash_parse_roundtrip() {
        let h = ContentHash::of(b"silo");
        let parsed = ContentHash::parse(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_content_hash_parse_rejects_garbage() {
        assert!(ContentHash::parse("zz").is_err());
        assert!(ContentHash::parse("abcd").is_err());
    }

    #[test]
    fn test_permission_total_order() {
        assert!(Permission::None < Permission::Read);
        assert!(Permission::Read < Permission::Write);
        assert!(Permission::Write < Permission::Delete);
        assert!(Permission::Delete < Permission::FullControl);
    }

    #[test]
    fn test_role_tier_gate() {
        assert!(RoleTier::Admin.allows(Permission::FullControl));
        assert!(RoleTier::PowerUser.allows(Permission::Delete));
        assert!(!RoleTier::PowerUser.allows(Permission::FullControl));
        assert!(RoleTier::User.allows(Permission::Write));
        assert!(!RoleTier::User.allows(Permission::Delete));
        assert!(RoleTier::ReadOnly.allows(Permission::Read));
        assert!(!RoleTier::ReadOnly.allows(Permission::Write));
    }

    #[test]
    fn test_acl_subject_string_form() {
        let user = UserId::new();
        let s = AclSubject::User(user).to_string();
        assert_eq!(AclSubject::parse(&s).unwrap(), AclSubject::User(user));

        assert_eq!(
            AclSubject::parse("Role:admins").unwrap(),
            AclSubject::Role("admins".into())
        );
        assert_eq!(
            AclSubject::parse("Role:Everyone").unwrap(),
            AclSubject::Everyone
        );
        assert!(AclSubject::parse("Role:").is_err());
        assert!(AclSubject::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_manifest_content_addressing() {
        let container = ContainerId::new();
        let a = Manifest::new(container, "docs/a.txt", b"same bytes");
        let b = Manifest::new(container, "docs/b.txt", b"same bytes");
        // Distinct identity, identical content address
        assert_ne!(a.id, b.id);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.blob_key(), b.blob_key());
    }

    #[test]
    fn test_container_owner_has_full_control() {
        let owner = UserId::new();
        let c = Container::new("projects", owner);
        assert_eq!(
            c.acl.get(&AclSubject::User(owner)),
            Some(&Permission::FullControl)
        );
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check("noop").is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            token.check("store"),
            Err(Error::Cancelled(ref what)) if what == "store"
        ));
    }
}
