//! Access control and authentication for Silo
//!
//! This crate provides the security core:
//! - AclEngine: container registry with normative ACL evaluation
//! - Authenticator: password/API-key authentication, lockout, sessions,
//!   and the two-layer `authorize` gate
//! - SessionStore: bounded-lifetime sessions with expiry sweeps
//! - ApiKeyStore: `sk_`-prefixed credentials with immediate revocation
//! - PasswordHash: labeled PBKDF2-HMAC-SHA256 records
//! - Keystore: AES-256-GCM encrypted key map under `Security/keystore.dat`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acl;
pub mod apikey;
pub mod authenticator;
pub mod keystore;
pub mod password;
pub mod session;

pub use acl::{AclEngine, Caller, PUBLIC_CONTAINER};
pub use apikey::{ApiKey, ApiKeyStore, API_KEY_PREFIX};
pub use authenticator::{Authenticator, User, LOCKOUT_THRESHOLD};
pub use keystore::{Keystore, MASTER_KEY_ENV};
pub use password::{constant_time_eq, PasswordHash, MIN_ITERATIONS, PBKDF2_SHA256};
pub use session::{AuthMethod, Session, SessionStore, DEFAULT_SESSION_TTL};
