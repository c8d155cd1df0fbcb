//! Core types and error model for the Silo warehouse
//!
//! This crate defines the foundational types used throughout the system:
//! - Error / ErrorKind: the unified error model
//! - ManifestId, ContainerId, SnapshotId, UserId: newtype identifiers
//! - ContentHash: SHA-256 content address
//! - Permission / RoleTier: the authorization lattices
//! - Manifest / Container: primary metadata records
//! - Granularity: snapshot capture levels
//! - CancelToken: cooperative cancellation signal

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{
    AclSubject, ApiKeyId, BackupId, CancelToken, Container, ContainerId, ContentHash, Granularity,
    Manifest, ManifestId, Permission, RoleTier, SnapshotId, UserId,
};
