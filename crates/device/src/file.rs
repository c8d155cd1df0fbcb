//! Local-filesystem device
//!
//! Stores each object as a file under a root directory, with an xxh3
//! checksum sidecar written next to it. Loads verify the checksum and report
//! `Corruption` on mismatch, letting the redundancy engine repair the chunk
//! from parity instead of returning damaged bytes.
//!
//! Writes go through a temp file then rename, so a crashed write never leaves
//! a half-written object under its final name.

use async_trait::async_trait;
use silo_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use xxhash_rust::xxh3::xxh3_64;

use crate::device::{strip_scheme, StorageDevice};

const CHECKSUM_EXT: &str = "xxh3";

/// Non-volatile device rooted at a local directory.
#[derive(Debug)]
pub struct FileDevice {
    root: PathBuf,
}

impl FileDevice {
    /// Create a device rooted at `root`. The directory is created if absent.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of this device.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let rel = strip_scheme(uri, "file");
        let rel = rel.trim_start_matches('/');
        if rel.is_empty() {
            return Err(Error::InvalidArgument("empty device URI".into()));
        }
        if rel.split('/').any(|seg| seg == "..") {
            return Err(Error::InvalidArgument(format!(
                "device URI escapes root: {uri}"
            )));
        }
        Ok(self.root.join(rel))
    }

    fn checksum_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".");
        os.push(CHECKSUM_EXT);
        PathBuf::from(os)
    }
}

#[async_trait]
impl StorageDevice for FileDevice {
    fn scheme(&self) -> &str {
        "file"
    }

    async fn save(&self, uri: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(uri)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        let digest = xxh3_64(bytes);
        fs::write(Self::checksum_path(&path), digest.to_le_bytes()).await?;
        Ok(())
    }

    async fn load(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.resolve(uri)?;
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(uri));
            }
            Err(e) => return Err(e.into()),
        };
        match fs::read(Self::checksum_path(&path)).await {
            Ok(stored) => {
                let stored = u64::from_le_bytes(
                    stored
                        .try_into()
                        .map_err(|_| Error::Corruption(format!("bad checksum record for {uri}")))?,
                );
                if stored != xxh3_64(&bytes) {
                    return Err(Error::Corruption(format!("checksum mismatch for {uri}")));
                }
            }
            // Checksum sidecar lost: treat the object as suspect
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Corruption(format!("missing checksum for {uri}")));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(bytes)
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = self.resolve(uri)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(Self::checksum_path(&path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        let path = self.resolve(uri)?;
        Ok(fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileDevice::new(dir.path()).unwrap();
        dev.save("file://chunks/blob/0", b"stripe data").await.unwrap();
        assert_eq!(dev.load("chunks/blob/0").await.unwrap(), b"stripe data");
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileDevice::new(dir.path()).unwrap();
        let err = dev.load("nope").await.unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_tampered_bytes_report_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileDevice::new(dir.path()).unwrap();
        dev.save("c0", b"original").await.unwrap();
        std::fs::write(dir.path().join("c0"), b"tampered").unwrap();
        let err = dev.load("c0").await.unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::Corruption);
    }

    #[tokio::test]
    async fn test_uri_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileDevice::new(dir.path()).unwrap();
        let err = dev.save("../outside", b"x").await.unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_delete_removes_checksum_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileDevice::new(dir.path()).unwrap();
        dev.save("c1", b"x").await.unwrap();
        dev.delete("c1").await.unwrap();
        assert!(!dev.exists("c1").await.unwrap());
        assert!(!dir.path().join("c1.xxh3").exists());
    }
}
