//! StorageDevice trait
//!
//! A backing device is opaque to the core: five operations plus a scheme
//! string. Implementations must be safe to call concurrently from multiple
//! tasks (Send + Sync) and report failures with the device error kinds
//! (`DeviceUnavailable`, `NotFound`, `Conflict`, `Corruption`).

use async_trait::async_trait;
use silo_core::Result;

/// Opaque backing device for blob chunks.
///
/// URIs follow `<scheme>://<relative_path>`; implementations accept both the
/// fully qualified form and the bare relative path.
#[async_trait]
pub trait StorageDevice: Send + Sync {
    /// Scheme identifying the device family (`file`, `mem`, `s3`, ...).
    fn scheme(&self) -> &str;

    /// Whether the device loses its contents on process exit.
    ///
    /// Volatile devices may join redundancy pools but are rejected as
    /// external-backup targets.
    fn is_volatile(&self) -> bool {
        false
    }

    /// Persist `bytes` under `uri`, overwriting any previous value.
    async fn save(&self, uri: &str, bytes: &[u8]) -> Result<()>;

    /// Retrieve the bytes stored under `uri`.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing is stored under `uri`; `Corruption` when the
    /// stored bytes fail their checksum.
    async fn load(&self, uri: &str) -> Result<Vec<u8>>;

    /// Remove the value stored under `uri`. Deleting a missing URI is not an
    /// error.
    async fn delete(&self, uri: &str) -> Result<()>;

    /// Whether a value is stored under `uri`.
    async fn exists(&self, uri: &str) -> Result<bool>;
}

/// Strip a `<scheme>://` prefix from a device URI, if present.
pub(crate) fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> &'a str {
    uri.strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix("://"))
        .unwrap_or(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("file://a/b", "file"), "a/b");
        assert_eq!(strip_scheme("a/b", "file"), "a/b");
        // A foreign scheme is left intact rather than misparsed
        assert_eq!(strip_scheme("s3://a/b", "file"), "s3://a/b");
    }

    #[test]
    fn test_trait_is_object_safe() {
        fn accepts(_d: &dyn StorageDevice) {}
        let _ = accepts as fn(&dyn StorageDevice);
    }
}
