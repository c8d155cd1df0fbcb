//! Error types for the Silo warehouse core
//!
//! This module defines the unified error type used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Every public operation returns [`Result<T>`]; no error is rendered as a
//! plain boolean. Each variant maps to exactly one [`ErrorKind`], and callers
//! that need to branch on outcome class should match on `kind()` rather than
//! on the variant itself.
//!
//! Propagation policy:
//! - Device-level transient failures (`DeviceUnavailable` during a read) are
//!   recovered locally by the redundancy engine via parity. They surface only
//!   when recovery also fails, as `UnrecoverableRead`.
//! - Missing containers report `NotFound`, never `Denied`; the existence of
//!   a private container is not disclosed.
//! - Cancellation is always surfaced, never swallowed.

use std::io;
use thiserror::Error;

/// Result type alias for Silo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an [`Error`], independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Entity does not exist
    NotFound,
    /// Entity already exists
    AlreadyExists,
    /// Caller-supplied argument is invalid
    InvalidArgument,
    /// Configuration rejected at construction time
    InvalidConfiguration,
    /// Authorization failed for an existing resource
    Denied,
    /// No valid session or credential
    Unauthenticated,
    /// Concurrent modification or state conflict
    Conflict,
    /// A backing device did not respond or timed out
    DeviceUnavailable,
    /// More devices failed than the redundancy level tolerates
    UnrecoverableRead,
    /// Stored bytes fail their checksum
    Corruption,
    /// A sealed hash no longer matches its content
    IntegrityFailure,
    /// A write could not be completed safely
    WriteFailed,
    /// The operation was cancelled by its caller
    Cancelled,
    /// The system is shedding load
    Throttled,
    /// Unexpected internal failure
    Internal,
}

/// Error type for the Silo warehouse
#[derive(Debug, Error)]
pub enum Error {
    /// Entity doesn't exist
    #[error("not found: {resource}")]
    NotFound {
        /// Identifier of the missing resource
        resource: String,
    },

    /// Entity already exists
    #[error("already exists: {resource}")]
    AlreadyExists {
        /// Identifier of the conflicting resource
        resource: String,
    },

    /// Invalid caller-supplied argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Authorization failed for a resource the caller may know exists
    #[error("access denied: {0}")]
    Denied(String),

    /// No valid session or credential was presented
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Concurrent modification or conflicting state
    #[error("conflict: {0}")]
    Conflict(String),

    /// A backing device did not respond, or exceeded its deadline
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// More devices failed than the configured level tolerates
    #[error("unrecoverable read for {key}: {failed} failures exceed tolerance {tolerance}")]
    UnrecoverableRead {
        /// Blob key that could not be reconstructed
        key: String,
        /// Number of failed chunks/devices observed
        failed: usize,
        /// Fault tolerance of the configured level
        tolerance: usize,
    },

    /// Stored bytes fail their checksum
    #[error("corruption: {0}")]
    Corruption(String),

    /// A sealed integrity hash no longer matches its content
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// A write could not be completed under the level's safety contract
    #[error("write failed for {key}: devices {failed_devices:?} did not complete")]
    WriteFailed {
        /// Blob key whose write failed
        key: String,
        /// Indices of the devices that failed
        failed_devices: Vec<usize>,
    },

    /// The operation observed its cancellation signal after partial work
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The system is under memory pressure and shedding load
    #[error("throttled: {0}")]
    Throttled(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Error::Denied(_) => ErrorKind::Denied,
            Error::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Error::UnrecoverableRead { .. } => ErrorKind::UnrecoverableRead,
            Error::Corruption(_) => ErrorKind::Corruption,
            Error::IntegrityFailure(_) => ErrorKind::IntegrityFailure,
            Error::WriteFailed { .. } => ErrorKind::WriteFailed,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Throttled(_) => ErrorKind::Throttled,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Identifier of the resource this error refers to, when known.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::NotFound { resource } | Error::AlreadyExists { resource } => {
                Some(resource.as_str())
            }
            Error::UnrecoverableRead { key, .. } | Error::WriteFailed { key, .. } => {
                Some(key.as_str())
            }
            _ => None,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(resource: impl Into<String>) -> Self {
        Error::NotFound {
            resource: resource.into(),
        }
    }

    /// Convenience constructor for [`Error::AlreadyExists`].
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Error::AlreadyExists {
            resource: resource.into(),
        }
    }

    /// True when a retry against a healthy system could succeed.
    ///
    /// Used by callers with retry loops; only transient device failures and
    /// throttling qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DeviceUnavailable | ErrorKind::Throttled
        )
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound {
                resource: e.to_string(),
            },
            io::ErrorKind::AlreadyExists => Error::AlreadyExists {
                resource: e.to_string(),
            },
            _ => Error::Internal(format!("I/O error: {e}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization error: {e}"))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Internal(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        let err = Error::not_found("manifest 42");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.resource(), Some("manifest 42"));
    }

    #[test]
    fn test_display_unrecoverable_read() {
        let err = Error::UnrecoverableRead {
            key: "blob-1".to_string(),
            failed: 3,
            tolerance: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("blob-1"));
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn test_write_failed_carries_devices() {
        let err = Error::WriteFailed {
            key: "blob-2".to_string(),
            failed_devices: vec![1, 3],
        };
        assert_eq!(err.kind(), ErrorKind::WriteFailed);
        assert_eq!(err.resource(), Some("blob-2"));
        assert!(err.to_string().contains("[1, 3]"));
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let io = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_io_other_maps_to_internal() {
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "locked");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::DeviceUnavailable("probe timeout".into()).is_retryable());
        assert!(Error::Throttled("severe pressure".into()).is_retryable());
        assert!(!Error::Denied("no read on c1".into()).is_retryable());
    }
}
