//! Restore engine
//!
//! Restores captured files out of a sealed snapshot with per-file conflict
//! handling. Integrity failures are a hard stop before any byte is written;
//! everything after that is partial-success territory; per-file failures
//! are warnings and the operation reports `restored / skipped / failed`
//! counts.
//!
//! Path comparison is case-sensitive throughout: restores must behave
//! identically on case-sensitive backing stores.

use silo_core::{
    CancelToken, ContainerId, ContentHash, Error, Granularity, Manifest, Permission, Result,
    RoleTier, SnapshotId,
};
use silo_security::{AclEngine, Caller, Session};
use std::collections::HashSet;
use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, warn};

use crate::store::SnapshotStore;
use crate::types::SnapshotStatus;

/// What to do when a restore destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// Leave the existing file; count as skipped
    #[default]
    Skip,
    /// Replace the existing file
    Overwrite,
    /// Write to `<stem>_v<UTC YYYYMMDDHHMMSS><ext>`
    CreateVersion,
    /// Write to `<stem>(<n>)<ext>` with the smallest unused `n`
    Rename,
    /// Count the file as failed
    Fail,
}

/// Restore parameters.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Destination root; defaults to `<warehouse_root>/restored`
    pub target_path: Option<PathBuf>,
    /// Overwrite without consulting the conflict rule
    pub overwrite_existing: bool,
    /// Conflict rule when the destination exists
    pub conflict_resolution: ConflictResolution,
    /// Verify the snapshot's integrity hash before writing anything
    pub verify_integrity: bool,
    /// Restore each file's captured timestamp as its modification time
    pub restore_timestamps: bool,
    /// Register a fresh manifest in the content index per restored file
    pub update_index: bool,
    /// Restrict the restore to these paths (exact or directory prefix)
    pub selective_paths: Option<Vec<String>>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            target_path: None,
            overwrite_existing: false,
            conflict_resolution: ConflictResolution::default(),
            verify_integrity: true,
            restore_timestamps: true,
            update_index: false,
            selective_paths: None,
        }
    }
}

/// Authenticated context for permission-gated restores.
pub struct RestoreAuth<'a> {
    /// The caller's session
    pub session: &'a Session,
    /// ACL engine holding the captured containers
    pub acl: &'a AclEngine,
}

/// Outcome counts of one restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Files written
    pub restored: usize,
    /// Files left alone by the `Skip` rule
    pub skipped: usize,
    /// Files that failed to restore
    pub failed: usize,
}

/// Permission a restore at `granularity` requires.
pub fn required_permission(granularity: Granularity) -> Permission {
    match granularity {
        Granularity::SingleFile | Granularity::Compartment => Permission::Read,
        Granularity::Partition | Granularity::StorageLayer => Permission::Write,
        Granularity::StoragePool | Granularity::MultiplePools | Granularity::CompleteInstance => {
            Permission::FullControl
        }
    }
}

impl SnapshotStore {
    /// Restore files from a sealed snapshot.
    pub async fn restore(
        &self,
        id: SnapshotId,
        options: &RestoreOptions,
        auth: Option<RestoreAuth<'_>>,
        cancel: &CancelToken,
    ) -> Result<RestoreReport> {
        let snapshot = self.get(id)?;
        if snapshot.status != SnapshotStatus::Immutable {
            return Err(Error::Conflict(format!(
                "snapshot {id} is not immutable ({:?})",
                snapshot.status
            )));
        }

        if options.verify_integrity && !self.verify(id).await? {
            return Err(Error::IntegrityFailure(format!(
                "snapshot {id} failed verification"
            )));
        }

        if let Some(auth) = &auth {
            let required = required_permission(snapshot.granularity);
            if !auth.session.tier.allows(required) {
                return Err(Error::Denied(format!(
                    "{:?} tier does not allow {required:?}",
                    auth.session.tier
                )));
            }
            let caller = Caller {
                user: auth.session.user_id,
                roles: &auth.session.roles,
                system_admin: auth.session.tier == RoleTier::Admin,
            };
            let containers: HashSet<ContainerId> =
                snapshot.manifests.iter().map(|m| m.container).collect();
            for container in containers {
                auth.acl.evaluate(&caller, container, required)?;
            }
        }

        let dest_root = options
            .target_path
            .clone()
            .unwrap_or_else(|| self.root().join("restored"));
        let data_dir = self.snapshot_dir(id).join("data");
        let mut report = RestoreReport::default();

        for entry in &snapshot.manifests {
            cancel.check("restore")?;
            if !selected(&entry.relative_path, options.selective_paths.as_deref()) {
                continue;
            }

            let src = data_dir.join(&entry.relative_path);
            let mut dest = dest_root.join(&entry.relative_path);

            if fs::try_exists(&dest).await? && !options.overwrite_existing {
                match options.conflict_resolution {
                    ConflictResolution::Skip => {
                        report.skipped += 1;
                        continue;
                    }
                    ConflictResolution::Overwrite => {}
                    ConflictResolution::CreateVersion => {
                        dest = versioned_path(&dest, chrono::Utc::now());
                    }
                    ConflictResolution::Rename => {
                        dest = renamed_path(&dest).await?;
                    }
                    ConflictResolution::Fail => {
                        warn!(path = entry.relative_path, "destination exists, conflict rule is Fail");
                        report.failed += 1;
                        continue;
                    }
                }
            }

            match restore_one(&src, &dest, entry.captured_at, options.restore_timestamps).await {
                Ok(()) => {
                    report.restored += 1;
                    if options.update_index {
                        self.reindex(entry, &snapshot.timestamp).await;
                    }
                }
                Err(e) => {
                    warn!(path = entry.relative_path, error = %e, "file restore failed");
                    report.failed += 1;
                }
            }
        }

        debug!(snapshot = %id, ?report, "restore finished");
        Ok(report)
    }

    /// Insert a fresh manifest for a restored file: new id, same content
    /// hash and size. Failures here are warnings, not restore failures.
    async fn reindex(
        &self,
        entry: &crate::types::SnapshotManifest,
        captured: &chrono::DateTime<chrono::Utc>,
    ) {
        let Ok(content_hash) = ContentHash::parse(&entry.hash) else {
            warn!(path = entry.relative_path, "captured hash is not reindexable");
            return;
        };
        let manifest = Manifest {
            id: silo_core::ManifestId::new(),
            container: entry.container,
            relative_path: entry.relative_path.clone(),
            content_hash,
            size: entry.size,
            created_at: *captured,
            modified_at: entry.captured_at,
        };
        if let Err(e) = self.index().insert(manifest).await {
            warn!(path = entry.relative_path, error = %e, "reindex failed");
        }
    }
}

fn selected(path: &str, selective: Option<&[String]>) -> bool {
    let Some(wanted) = selective else {
        return true;
    };
    wanted
        .iter()
        .any(|w| path == w || path.starts_with(&format!("{w}/")))
}

async fn restore_one(
    src: &Path,
    dest: &Path,
    captured_at: chrono::DateTime<chrono::Utc>,
    restore_timestamps: bool,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::copy(src, dest).await?;

    if restore_timestamps {
        // The captured timestamp becomes both access and modification time;
        // creation time is not settable on every platform
        let secs = captured_at.timestamp().max(0) as u64;
        let nanos = captured_at.timestamp_subsec_nanos();
        let when = UNIX_EPOCH + Duration::new(secs, nanos);
        set_file_times(dest, when)?;
    }
    Ok(())
}

fn set_file_times(path: &Path, when: SystemTime) -> Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(FileTimes::new().set_accessed(when).set_modified(when))?;
    Ok(())
}

/// `CreateVersion` destination: `<stem>_v<UTC YYYYMMDDHHMMSS><ext>`.
fn versioned_path(path: &Path, now: chrono::DateTime<chrono::Utc>) -> PathBuf {
    let stamp = now.format("%Y%m%d%H%M%S");
    with_suffix(path, &format!("_v{stamp}"))
}

/// `Rename` destination: `<stem>(<n>)<ext>` with the smallest unused `n`.
async fn renamed_path(path: &Path) -> Result<PathBuf> {
    let mut n = 1u32;
    loop {
        let candidate = with_suffix(path, &format!("({n})"));
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}{ext}"))
}
