//! External backup targets
//!
//! Copies a snapshot or backup directory onto a foreign device and persists
//! a JSON metadata side-file. The target must be non-volatile and of a
//! different scheme than the source pool.
//!
//! `verify_after_upload` re-downloads each uploaded object and compares it
//! hash-for-hash; any mismatch surfaces as `IntegrityFailure`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use silo_core::{BackupId, CancelToken, Error, Result};
use silo_device::{validate_external_target, DevicePool, StorageDevice};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// Metadata side-file persisted on the target device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalBackupMetadata {
    /// Backup identifier
    pub backup_id: BackupId,
    /// Upload time (UTC)
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
    /// Target device scheme
    pub scheme: String,
    /// Uploaded objects: relative path → SHA-256 (hex)
    pub objects: Vec<(String, String)>,
    /// Total bytes uploaded
    pub total_bytes: u64,
}

/// Outcome of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Objects uploaded
    pub uploaded: usize,
    /// Bytes uploaded
    pub bytes: u64,
    /// Whether post-upload verification ran
    pub verified: bool,
}

/// One external backup destination.
pub struct ExternalBackupTarget {
    device: Arc<dyn StorageDevice>,
    verify_after_upload: bool,
}

impl std::fmt::Debug for ExternalBackupTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalBackupTarget")
            .field("verify_after_upload", &self.verify_after_upload)
            .finish()
    }
}

impl ExternalBackupTarget {
    /// Validate `device` against the source pool and wrap it as a target.
    pub fn new(pool: &DevicePool, device: Arc<dyn StorageDevice>) -> Result<Self> {
        validate_external_target(pool, device.as_ref())?;
        Ok(Self {
            device,
            verify_after_upload: true,
        })
    }

    /// Enable or disable post-upload verification.
    pub fn verify_after_upload(mut self, verify: bool) -> Self {
        self.verify_after_upload = verify;
        self
    }

    /// Upload every file under `source_dir` as
    /// `<scheme>://backups/<backup_id>/<relative_path>` and persist the
    /// metadata side-file.
    pub async fn upload(
        &self,
        backup_id: BackupId,
        source_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<UploadReport> {
        let files = collect_files(source_dir).await?;
        let scheme = self.device.scheme().to_string();
        let mut objects = Vec::with_capacity(files.len());
        let mut total_bytes = 0u64;

        for relative in &files {
            cancel.check("external backup upload")?;
            let bytes = fs::read(source_dir.join(relative)).await?;
            let uri = object_uri(&scheme, backup_id, relative);
            self.device.save(&uri, &bytes).await?;
            total_bytes += bytes.len() as u64;
            objects.push((relative.clone(), hex::encode(Sha256::digest(&bytes))));
        }

        if self.verify_after_upload {
            for (relative, expected) in &objects {
                cancel.check("external backup verify")?;
                let uri = object_uri(&scheme, backup_id, relative);
                let downloaded = self.device.load(&uri).await?;
                let actual = hex::encode(Sha256::digest(&downloaded));
                if actual != *expected {
                    warn!(backup = %backup_id, path = relative.as_str(), "uploaded object does not match source");
                    return Err(Error::IntegrityFailure(format!(
                        "uploaded object {relative} hash mismatch"
                    )));
                }
            }
        }

        let metadata = ExternalBackupMetadata {
            backup_id,
            uploaded_at: chrono::Utc::now(),
            scheme: scheme.clone(),
            objects: objects.clone(),
            total_bytes,
        };
        let metadata_uri = format!("{scheme}://backups/{backup_id}/metadata.json");
        self.device
            .save(&metadata_uri, &serde_json::to_vec_pretty(&metadata)?)
            .await?;

        info!(backup = %backup_id, files = objects.len(), total_bytes, "external upload complete");
        Ok(UploadReport {
            uploaded: objects.len(),
            bytes: total_bytes,
            verified: self.verify_after_upload,
        })
    }
}

fn object_uri(scheme: &str, backup_id: BackupId, relative: &str) -> String {
    format!("{scheme}://backups/{backup_id}/{relative}")
}

/// Relative paths of every file under `root`, sorted.
async fn collect_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut stack = vec![PathBuf::new()];
    while let Some(prefix) = stack.pop() {
        let mut entries = fs::read_dir(root.join(&prefix)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let relative = prefix.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                stack.push(relative);
            } else {
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    files.sort();
    Ok(files)
}
