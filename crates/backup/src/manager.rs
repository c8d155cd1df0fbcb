//! Backup manager
//!
//! Three backup kinds:
//! - **Full**: every manifest in the index.
//! - **Incremental**: manifests modified since the most recent completed
//!   backup of any kind.
//! - **Differential**: manifests modified since the most recent completed
//!   Full.
//!
//! An incremental or differential with no usable base silently promotes to
//! Full; the record keeps both the requested and the actual kind.
//!
//! Retention runs after every successful backup and deletes backups older
//! than `retention_days`, except a Full that a surviving incremental or
//! differential still depends on. Expired dependents are deleted first, so a
//! fully expired chain drains over successive passes of the same run.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use silo_core::{BackupId, CancelToken, Error, Result};
use silo_index::{ContentIndex, Predicate};
use silo_raid::RaidEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// Kind of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    /// Everything
    Full,
    /// Delta since the most recent completed backup
    Incremental,
    /// Delta since the most recent completed Full
    Differential,
}

/// Lifecycle state of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    /// Copy in progress
    Running,
    /// Sealed and usable as a base
    Completed,
    /// Aborted; not usable as a base
    Failed,
}

/// One file inside a backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Path relative to the backup's `data/` directory
    pub relative_path: String,
    /// Content hash (hex)
    pub hash: String,
    /// Byte length
    pub size: u64,
}

/// Backup record, serialized into `metadata.json` inside the backup
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Stable identifier
    pub id: BackupId,
    /// Kind actually performed
    pub kind: BackupKind,
    /// Kind the caller asked for (differs on silent promotion)
    pub requested_kind: BackupKind,
    /// Base backup for deltas
    pub base: Option<BackupId>,
    /// Start time (UTC); delta cutoff for dependents
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Backup directory (or archive) path
    pub path: PathBuf,
    /// Whether the backup was archived to `.tar.zst`
    pub archived: bool,
    /// Lifecycle state
    pub status: BackupStatus,
    /// Captured files
    pub entries: Vec<BackupEntry>,
}

/// Backup behavior knobs.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Age past which backups become deletable
    pub retention_days: i64,
    /// Archive the directory into `.tar.zst` after sealing
    pub archive: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            archive: false,
        }
    }
}

/// Creates, retains and deletes backups under `<root>/backups`.
pub struct BackupManager {
    root: PathBuf,
    index: Arc<ContentIndex>,
    raid: Arc<RaidEngine>,
    records: DashMap<BackupId, BackupRecord>,
    config: BackupConfig,
}

impl BackupManager {
    /// Open the manager, loading records already on disk. Unreadable
    /// `metadata.json` files are skipped with a warning.
    pub fn open(
        root: impl Into<PathBuf>,
        index: Arc<ContentIndex>,
        raid: Arc<RaidEngine>,
        config: BackupConfig,
    ) -> Result<Self> {
        let root = root.into();
        let dir = root.join("backups");
        std::fs::create_dir_all(&dir)?;

        let records = DashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            // Directory backups keep metadata.json inside; archived backups
            // keep a side JSON next to the .tar.zst
            let metadata = if entry.path().is_dir() {
                entry.path().join("metadata.json")
            } else if entry.path().extension().is_some_and(|e| e == "json") {
                entry.path()
            } else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            match std::fs::read(&metadata)
                .map_err(Error::from)
                .and_then(|b| serde_json::from_slice::<BackupRecord>(&b).map_err(Error::from))
            {
                Ok(record) => {
                    records.insert(record.id, record);
                }
                Err(e) => {
                    warn!(path = %metadata.display(), error = %e, "skipping unreadable backup record");
                }
            }
        }

        Ok(Self {
            root,
            index,
            raid,
            records,
            config,
        })
    }

    /// All backup records.
    pub fn list(&self) -> Vec<BackupRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    /// Fetch one record.
    pub fn get(&self, id: BackupId) -> Result<BackupRecord> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::not_found(format!("backup {id}")))
    }

    /// Create a backup of the requested kind, then apply retention.
    pub async fn create_backup(
        &self,
        requested: BackupKind,
        cancel: &CancelToken,
    ) -> Result<BackupRecord> {
        cancel.check("backup")?;
        let (kind, base) = self.resolve_kind(requested);
        let cutoff = base.as_ref().map(|b| b.timestamp);

        let id = BackupId::new();
        let now = chrono::Utc::now();
        let dir_name = format!("{}_{}", now.format("%Y-%m-%d_%H%M%S"), short_id(&id));
        let dir = self.root.join("backups").join(&dir_name);
        let data_dir = dir.join("data");
        fs::create_dir_all(&data_dir).await?;

        let mut record = BackupRecord {
            id,
            kind,
            requested_kind: requested,
            base: base.map(|b| b.id),
            timestamp: now,
            path: dir.clone(),
            archived: false,
            status: BackupStatus::Running,
            entries: Vec::new(),
        };

        let manifests = self.index.query(&Predicate::All).await?;
        for manifest in manifests {
            if cancel.is_cancelled() {
                record.status = BackupStatus::Failed;
                self.persist(&record).await?;
                self.records.insert(record.id, record.clone());
                return Err(Error::Cancelled(format!("backup {id}")));
            }
            if cutoff.map_or(false, |c| manifest.modified_at <= c) {
                continue;
            }
            match self.raid.load(&manifest.blob_key(), cancel).await {
                Ok(bytes) => {
                    let dest = data_dir.join(&manifest.relative_path);
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                    fs::write(&dest, &bytes).await?;
                    record.entries.push(BackupEntry {
                        relative_path: manifest.relative_path.clone(),
                        hash: manifest.content_hash.to_hex(),
                        size: manifest.size,
                    });
                }
                Err(e) => {
                    warn!(backup = %id, path = manifest.relative_path, error = %e, "backup copy failed, skipping");
                }
            }
        }

        record.status = BackupStatus::Completed;
        self.persist(&record).await?;

        if self.config.archive {
            let archive_path = self.archive(&dir).await?;
            fs::remove_dir_all(&dir).await?;
            record.path = archive_path;
            record.archived = true;
            // The record travels inside an archived backup; keep a side copy
            // next to the archive so `open` can still find it
            let side = record.path.with_extension("json");
            fs::write(&side, serde_json::to_vec_pretty(&record)?).await?;
        }

        self.records.insert(record.id, record.clone());
        info!(backup = %id, ?kind, files = record.entries.len(), "backup completed");

        self.apply_retention().await?;
        Ok(record)
    }

    /// Delete one backup.
    ///
    /// # Errors
    ///
    /// `Conflict` when the target is a Full that a surviving delta depends
    /// on.
    pub async fn delete_backup(&self, id: BackupId) -> Result<()> {
        let record = self.get(id)?;
        if record.kind == BackupKind::Full && self.has_dependents(id) {
            return Err(Error::Conflict(format!(
                "backup {id} is the base of surviving incremental/differential backups"
            )));
        }
        if record.archived {
            for path in [&record.path, &record.path.with_extension("json")] {
                if fs::try_exists(path).await? {
                    fs::remove_file(path).await?;
                }
            }
        } else if fs::try_exists(&record.path).await? {
            fs::remove_dir_all(&record.path).await?;
        }
        self.records.remove(&id);
        Ok(())
    }

    /// Delete expired backups, dependents before their bases.
    pub async fn apply_retention(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.retention_days);
        let mut deleted = 0usize;
        loop {
            let expired: Vec<BackupId> = self
                .records
                .iter()
                .filter(|e| e.value().timestamp < cutoff)
                .filter(|e| {
                    e.value().kind != BackupKind::Full || !self.has_dependents(*e.key())
                })
                .map(|e| *e.key())
                .collect();
            if expired.is_empty() {
                break;
            }
            for id in expired {
                self.delete_backup(id).await?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(deleted, "retention pass removed expired backups");
        }
        Ok(deleted)
    }

    /// Whether any surviving record's base chain reaches `id`.
    fn has_dependents(&self, id: BackupId) -> bool {
        self.records.iter().any(|e| {
            if *e.key() == id {
                return false;
            }
            let mut base = e.value().base;
            while let Some(b) = base {
                if b == id {
                    return true;
                }
                base = self.records.get(&b).and_then(|r| r.base);
            }
            false
        })
    }

    fn resolve_kind(&self, requested: BackupKind) -> (BackupKind, Option<BackupRecord>) {
        let mut completed: Vec<BackupRecord> = self
            .records
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.status == BackupStatus::Completed)
            .collect();
        completed.sort_by_key(|r| r.timestamp);

        let base = match requested {
            BackupKind::Full => None,
            BackupKind::Incremental => completed.last().cloned(),
            BackupKind::Differential => completed
                .iter()
                .rev()
                .find(|r| r.kind == BackupKind::Full)
                .cloned(),
        };
        match (requested, base) {
            (BackupKind::Full, _) => (BackupKind::Full, None),
            (_, None) => {
                // No usable base: silent promotion
                (BackupKind::Full, None)
            }
            (kind, Some(base)) => (kind, Some(base)),
        }
    }

    async fn persist(&self, record: &BackupRecord) -> Result<()> {
        let path = record.path.join("metadata.json");
        fs::write(&path, serde_json::to_vec_pretty(record)?).await?;
        Ok(())
    }

    /// Pack a backup directory into `<dir>.tar.zst`.
    async fn archive(&self, dir: &Path) -> Result<PathBuf> {
        let dir = dir.to_path_buf();
        let archive_path = dir.with_extension("tar.zst");
        let out_path = archive_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::File::create(&out_path)?;
            let encoder = zstd::Encoder::new(file, 0)
                .map_err(|e| Error::Internal(format!("zstd encoder: {e}")))?
                .auto_finish();
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(".", &dir)?;
            builder.finish()?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("archive task: {e}")))??;
        Ok(archive_path)
    }
}

fn short_id(id: &BackupId) -> String {
    hex::encode(&id.as_bytes()[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::{ContainerId, Manifest};
    use silo_device::{DevicePool, MemoryDevice, StorageDevice};
    use silo_raid::{RaidConfig, RaidLevel};

    async fn fixture(
        config: BackupConfig,
    ) -> (tempfile::TempDir, Arc<ContentIndex>, Arc<RaidEngine>, BackupManager) {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(ContentIndex::new());
        let pool = DevicePool::new(
            (0..3)
                .map(|_| Arc::new(MemoryDevice::new()) as Arc<dyn StorageDevice>)
                .collect(),
        )
        .unwrap();
        let raid = Arc::new(
            RaidEngine::new(RaidConfig::new(RaidLevel::L5, 3).stripe_size(8), pool).unwrap(),
        );
        let manager =
            BackupManager::open(dir.path(), index.clone(), raid.clone(), config).unwrap();
        (dir, index, raid, manager)
    }

    async fn put_object(
        index: &ContentIndex,
        raid: &RaidEngine,
        path: &str,
        bytes: &[u8],
    ) -> Manifest {
        let manifest = Manifest::new(ContainerId::new(), path, bytes);
        raid.store(&manifest.blob_key(), bytes, &CancelToken::new())
            .await
            .unwrap();
        index.insert(manifest.clone()).await.unwrap();
        manifest
    }

    #[tokio::test]
    async fn test_full_backup_captures_everything() {
        let (_dir, index, raid, manager) = fixture(BackupConfig::default()).await;
        put_object(&index, &raid, "a.txt", b"alpha").await;
        put_object(&index, &raid, "b/c.txt", b"beta").await;

        let record = manager
            .create_backup(BackupKind::Full, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(record.kind, BackupKind::Full);
        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(record.entries.len(), 2);
        assert!(record.path.join("metadata.json").is_file());
        assert_eq!(
            std::fs::read(record.path.join("data/b/c.txt")).unwrap(),
            b"beta"
        );

        // Directory name shape: <YYYY-MM-DD_HHMMSS>_<short_id>
        let name = record.path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), "2024-01-01_120000".len() + 1 + 8);
    }

    #[tokio::test]
    async fn test_incremental_without_base_promotes_to_full() {
        let (_dir, index, raid, manager) = fixture(BackupConfig::default()).await;
        put_object(&index, &raid, "a.txt", b"alpha").await;

        let record = manager
            .create_backup(BackupKind::Incremental, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(record.kind, BackupKind::Full);
        assert_eq!(record.requested_kind, BackupKind::Incremental);
        assert!(record.base.is_none());
    }

    #[tokio::test]
    async fn test_incremental_captures_only_delta() {
        let (_dir, index, raid, manager) = fixture(BackupConfig::default()).await;
        put_object(&index, &raid, "old.txt", b"old").await;

        let full = manager
            .create_backup(BackupKind::Full, &CancelToken::new())
            .await
            .unwrap();

        put_object(&index, &raid, "new.txt", b"new").await;
        let incr = manager
            .create_backup(BackupKind::Incremental, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(incr.kind, BackupKind::Incremental);
        assert_eq!(incr.base, Some(full.id));
        assert_eq!(incr.entries.len(), 1);
        assert_eq!(incr.entries[0].relative_path, "new.txt");
    }

    #[tokio::test]
    async fn test_differential_bases_on_last_full() {
        let (_dir, index, raid, manager) = fixture(BackupConfig::default()).await;
        put_object(&index, &raid, "a.txt", b"1").await;
        let full = manager
            .create_backup(BackupKind::Full, &CancelToken::new())
            .await
            .unwrap();
        put_object(&index, &raid, "b.txt", b"2").await;
        manager
            .create_backup(BackupKind::Incremental, &CancelToken::new())
            .await
            .unwrap();
        put_object(&index, &raid, "c.txt", b"3").await;

        // Differential skips over the incremental and bases on the Full
        let diff = manager
            .create_backup(BackupKind::Differential, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(diff.base, Some(full.id));
        assert_eq!(diff.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_full_with_dependents_refuses_deletion() {
        let (_dir, index, raid, manager) = fixture(BackupConfig::default()).await;
        put_object(&index, &raid, "a.txt", b"1").await;
        let full = manager
            .create_backup(BackupKind::Full, &CancelToken::new())
            .await
            .unwrap();
        put_object(&index, &raid, "b.txt", b"2").await;
        let incr = manager
            .create_backup(BackupKind::Incremental, &CancelToken::new())
            .await
            .unwrap();

        let err = manager.delete_backup(full.id).await.unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::Conflict);

        // Dropping the dependent frees the base
        manager.delete_backup(incr.id).await.unwrap();
        manager.delete_backup(full.id).await.unwrap();
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_retention_drains_expired_chain_dependents_first() {
        let (_dir, index, raid, manager) = fixture(BackupConfig {
            retention_days: 10,
            archive: false,
        })
        .await;
        put_object(&index, &raid, "a.txt", b"1").await;
        let full = manager
            .create_backup(BackupKind::Full, &CancelToken::new())
            .await
            .unwrap();
        put_object(&index, &raid, "b.txt", b"2").await;
        let incr = manager
            .create_backup(BackupKind::Incremental, &CancelToken::new())
            .await
            .unwrap();

        // Backdate both past retention
        for id in [full.id, incr.id] {
            let mut record = manager.records.get_mut(&id).unwrap();
            record.timestamp = chrono::Utc::now() - chrono::Duration::days(40);
        }

        let deleted = manager.apply_retention().await.unwrap();
        assert_eq!(deleted, 2);
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_retention_spares_full_with_live_dependent() {
        let (_dir, index, raid, manager) = fixture(BackupConfig {
            retention_days: 10,
            archive: false,
        })
        .await;
        put_object(&index, &raid, "a.txt", b"1").await;
        let full = manager
            .create_backup(BackupKind::Full, &CancelToken::new())
            .await
            .unwrap();
        put_object(&index, &raid, "b.txt", b"2").await;
        let incr = manager
            .create_backup(BackupKind::Incremental, &CancelToken::new())
            .await
            .unwrap();

        // Only the Full is expired; its dependent is still in retention
        {
            let mut record = manager.records.get_mut(&full.id).unwrap();
            record.timestamp = chrono::Utc::now() - chrono::Duration::days(40);
        }
        let deleted = manager.apply_retention().await.unwrap();
        assert_eq!(deleted, 0);
        assert!(manager.get(full.id).is_ok());
        assert!(manager.get(incr.id).is_ok());
    }

    #[tokio::test]
    async fn test_archived_backup() {
        let (_dir, index, raid, manager) = fixture(BackupConfig {
            retention_days: 30,
            archive: true,
        })
        .await;
        put_object(&index, &raid, "a.txt", b"alpha").await;

        let record = manager
            .create_backup(BackupKind::Full, &CancelToken::new())
            .await
            .unwrap();
        assert!(record.archived);
        assert!(record.path.to_string_lossy().ends_with(".tar.zst"));
        assert!(record.path.is_file());
        // The unpacked directory is gone
        let dir_path = record.path.to_string_lossy().replace(".tar.zst", "");
        assert!(!std::path::Path::new(&dir_path).exists());
    }

    #[tokio::test]
    async fn test_records_reload_from_disk() {
        let (dir, index, raid, manager) = fixture(BackupConfig::default()).await;
        put_object(&index, &raid, "a.txt", b"1").await;
        let record = manager
            .create_backup(BackupKind::Full, &CancelToken::new())
            .await
            .unwrap();

        let reopened = BackupManager::open(
            dir.path(),
            index.clone(),
            raid.clone(),
            BackupConfig::default(),
        )
        .unwrap();
        assert_eq!(reopened.get(record.id).unwrap().entries.len(), 1);
    }
}
