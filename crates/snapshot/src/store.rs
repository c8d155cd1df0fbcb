//! Snapshot store
//!
//! Capture pipeline:
//! 1. Resolve the manifest set for the requested granularity via the index.
//! 2. Copy each manifest's bytes out of the redundancy engine into
//!    `snapshots/<id>/data/<relative_path>`.
//! 3. Record a snapshot-manifest per captured file. A per-file copy failure
//!    is logged and skipped; the snapshot is still sealed with what it
//!    captured, and its counts reflect captured rather than requested files.
//! 4. Compute the integrity hash and seal the record as `Immutable` in
//!    `snapshot.json` (temp-then-rename, so a crash never leaves a sealed
//!    half-written record).
//!
//! `CompleteInstance` captures additionally copy the `Config/` and
//! `Metadata/` directory trees. Cancellation marks the snapshot `Failed`
//! rather than sealing partial work.

use dashmap::DashMap;
use silo_core::{CancelToken, Error, Granularity, Manifest, ManifestId, Result, SnapshotId};
use silo_index::{ContentIndex, Predicate};
use silo_raid::RaidEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::types::{Snapshot, SnapshotManifest, SnapshotStatus};

/// Snapshot registry and capture engine.
pub struct SnapshotStore {
    root: PathBuf,
    index: Arc<ContentIndex>,
    raid: Arc<RaidEngine>,
    registry: DashMap<SnapshotId, Snapshot>,
}

impl SnapshotStore {
    /// Open the store under the warehouse root, loading any snapshots
    /// already on disk. Records that fail to parse are skipped with a
    /// warning.
    pub fn open(
        root: impl Into<PathBuf>,
        index: Arc<ContentIndex>,
        raid: Arc<RaidEngine>,
    ) -> Result<Self> {
        let root = root.into();
        let snapshots_dir = root.join("snapshots");
        std::fs::create_dir_all(&snapshots_dir)?;

        let registry = DashMap::new();
        for entry in std::fs::read_dir(&snapshots_dir)? {
            let entry = entry?;
            let record = entry.path().join("snapshot.json");
            if !record.is_file() {
                continue;
            }
            match std::fs::read(&record)
                .map_err(Error::from)
                .and_then(|bytes| serde_json::from_slice::<Snapshot>(&bytes).map_err(Error::from))
            {
                Ok(snapshot) => {
                    registry.insert(snapshot.id, snapshot);
                }
                Err(e) => {
                    warn!(path = %record.display(), error = %e, "skipping unreadable snapshot record");
                }
            }
        }

        Ok(Self {
            root,
            index,
            raid,
            registry,
        })
    }

    /// Warehouse root this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content index used to resolve capture sets.
    pub fn index(&self) -> &Arc<ContentIndex> {
        &self.index
    }

    /// Directory holding one snapshot.
    pub fn snapshot_dir(&self, id: SnapshotId) -> PathBuf {
        self.root.join("snapshots").join(id.to_string())
    }

    /// Fetch a snapshot record.
    pub fn get(&self, id: SnapshotId) -> Result<Snapshot> {
        self.registry
            .get(&id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::not_found(format!("snapshot {id}")))
    }

    /// All snapshot records.
    pub fn list(&self) -> Vec<Snapshot> {
        self.registry.iter().map(|e| e.value().clone()).collect()
    }

    /// Create a snapshot at `granularity`.
    ///
    /// `target` selects the capture set for every granularity except
    /// `CompleteInstance`; its meaning per level is the index query used.
    pub async fn create(
        &self,
        granularity: Granularity,
        target: Option<&str>,
        description: &str,
        cancel: &CancelToken,
    ) -> Result<Snapshot> {
        let manifests = self.manifests_for(granularity, target).await?;
        let requested = manifests.len();

        let mut snapshot = Snapshot::begin(granularity, target.map(String::from), description);
        let data_dir = self.snapshot_dir(snapshot.id).join("data");
        fs::create_dir_all(&data_dir).await?;

        for manifest in manifests {
            if cancel.is_cancelled() {
                snapshot.status = SnapshotStatus::Failed;
                self.persist(&snapshot).await?;
                self.registry.insert(snapshot.id, snapshot.clone());
                return Err(Error::Cancelled(format!("snapshot {}", snapshot.id)));
            }
            match self.capture_file(&data_dir, &manifest, cancel).await {
                Ok(()) => {
                    snapshot.manifests.push(SnapshotManifest {
                        manifest_id: manifest.id,
                        container: manifest.container,
                        relative_path: manifest.relative_path.clone(),
                        size: manifest.size,
                        hash: manifest.content_hash.to_hex(),
                        captured_at: manifest.modified_at,
                    });
                }
                Err(e) => {
                    warn!(
                        snapshot = %snapshot.id,
                        path = manifest.relative_path,
                        error = %e,
                        "file capture failed, skipping"
                    );
                }
            }
        }

        if granularity == Granularity::CompleteInstance {
            for tree in ["Config", "Metadata"] {
                let src = self.root.join(tree);
                if src.is_dir() {
                    copy_tree(&src, &self.snapshot_dir(snapshot.id).join(tree)).await?;
                }
            }
        }

        snapshot.integrity_hash = snapshot.compute_integrity_hash();
        snapshot.status = SnapshotStatus::Immutable;
        self.persist(&snapshot).await?;
        self.registry.insert(snapshot.id, snapshot.clone());
        info!(
            snapshot = %snapshot.id,
            ?granularity,
            captured = snapshot.manifests.len(),
            requested,
            "snapshot sealed"
        );
        Ok(snapshot)
    }

    /// Recompute the integrity hash from the on-disk record and compare it
    /// bitwise to the sealed value.
    pub async fn verify(&self, id: SnapshotId) -> Result<bool> {
        let record = self.snapshot_dir(id).join("snapshot.json");
        let bytes = match fs::read(&record).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("snapshot {id}")));
            }
            Err(e) => return Err(e.into()),
        };
        let stored: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(stored.status == SnapshotStatus::Immutable
            && stored.compute_integrity_hash() == stored.integrity_hash)
    }

    /// Delete a snapshot. Protected snapshots are refused.
    pub async fn delete(&self, id: SnapshotId) -> Result<()> {
        let snapshot = self.get(id)?;
        if snapshot.protected {
            return Err(Error::Denied(format!("snapshot {id} is protected")));
        }
        let dir = self.snapshot_dir(id);
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await?;
        }
        self.registry.remove(&id);
        Ok(())
    }

    /// Flip the protection flag, the only field mutable after sealing.
    pub async fn set_protected(&self, id: SnapshotId, protected: bool) -> Result<()> {
        let mut snapshot = self.get(id)?;
        snapshot.protected = protected;
        self.persist(&snapshot).await?;
        self.registry.insert(id, snapshot);
        Ok(())
    }

    async fn capture_file(
        &self,
        data_dir: &Path,
        manifest: &Manifest,
        cancel: &CancelToken,
    ) -> Result<()> {
        let bytes = self.raid.load(&manifest.blob_key(), cancel).await?;
        let dest = data_dir.join(&manifest.relative_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&dest, &bytes).await?;
        self.index.touch(manifest.id);
        Ok(())
    }

    async fn manifests_for(
        &self,
        granularity: Granularity,
        target: Option<&str>,
    ) -> Result<Vec<Manifest>> {
        let need_target = |t: Option<&str>| {
            t.map(str::to_string).ok_or_else(|| {
                Error::InvalidArgument(format!("{granularity:?} snapshot requires a target id"))
            })
        };

        match granularity {
            Granularity::SingleFile => {
                let raw = need_target(target)?;
                let id = ManifestId::parse(&raw)
                    .ok_or_else(|| Error::InvalidArgument(format!("bad manifest id: {raw}")))?;
                let manifest = self.index.try_get(id).await?.ok_or_else(|| {
                    Error::InvalidArgument(format!("manifest {id} does not exist"))
                })?;
                Ok(vec![manifest])
            }
            Granularity::Compartment => {
                self.index
                    .query(&Predicate::PathPrefix(need_target(target)?))
                    .await
            }
            Granularity::Partition => {
                let raw = need_target(target)?;
                let id = silo_core::ContainerId::parse(&raw)
                    .ok_or_else(|| Error::InvalidArgument(format!("bad container id: {raw}")))?;
                self.index.query(&Predicate::Container(id)).await
            }
            Granularity::StorageLayer => {
                self.index
                    .query(&Predicate::Layer(need_target(target)?))
                    .await
            }
            Granularity::StoragePool => {
                self.index
                    .query(&Predicate::Pool(need_target(target)?))
                    .await
            }
            Granularity::MultiplePools => {
                let raw = need_target(target)?;
                let pools = raw.split(',').map(|p| p.trim().to_string()).collect();
                self.index.query(&Predicate::Pools(pools)).await
            }
            Granularity::CompleteInstance => self.index.query(&Predicate::All).await,
        }
    }

    pub(crate) async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = self.snapshot_dir(snapshot.id);
        fs::create_dir_all(&dir).await?;
        let record = dir.join("snapshot.json");
        let tmp = dir.join("snapshot.json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?).await?;
        fs::rename(&tmp, &record).await?;
        Ok(())
    }
}

/// Recursive directory copy.
fn copy_tree<'a>(
    src: &'a Path,
    dest: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(dest).await?;
        let mut entries = fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let target = dest.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_tree(&path, &target).await?;
            } else {
                fs::copy(&path, &target).await?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::ContainerId;
    use silo_device::{DevicePool, MemoryDevice, StorageDevice};
    use silo_raid::{RaidConfig, RaidLevel};

    async fn fixture() -> (tempfile::TempDir, Arc<ContentIndex>, Arc<RaidEngine>, SnapshotStore) {
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
        let store = SnapshotStore::open(dir.path(), index.clone(), raid.clone()).unwrap();
        (dir, index, raid, store)
    }

    async fn put_object(
        index: &ContentIndex,
        raid: &RaidEngine,
        container: ContainerId,
        path: &str,
        bytes: &[u8],
    ) -> Manifest {
        let manifest = Manifest::new(container, path, bytes);
        raid.store(&manifest.blob_key(), bytes, &CancelToken::new())
            .await
            .unwrap();
        index.insert(manifest.clone()).await.unwrap();
        manifest
    }

    #[tokio::test]
    async fn test_single_file_snapshot_and_verify() {
        let (_dir, index, raid, store) = fixture().await;
        let container = ContainerId::new();
        let manifest = put_object(&index, &raid, container, "docs/a.txt", b"hello").await;

        let snap = store
            .create(
                Granularity::SingleFile,
                Some(&manifest.id.to_string()),
                "one file",
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(snap.status, SnapshotStatus::Immutable);
        assert_eq!(snap.manifests.len(), 1);
        let captured = store.snapshot_dir(snap.id).join("data/docs/a.txt");
        assert_eq!(std::fs::read(captured).unwrap(), b"hello");
        assert!(store.verify(snap.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_single_file_missing_target_is_invalid_argument() {
        let (_dir, _index, _raid, store) = fixture().await;
        let err = store
            .create(
                Granularity::SingleFile,
                Some(&ManifestId::new().to_string()),
                "",
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::InvalidArgument);

        let err = store
            .create(Granularity::SingleFile, None, "", &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_tampered_record_fails_verification() {
        let (_dir, index, raid, store) = fixture().await;
        let container = ContainerId::new();
        let m = put_object(&index, &raid, container, "a.txt", b"data").await;
        let snap = store
            .create(
                Granularity::SingleFile,
                Some(&m.id.to_string()),
                "",
                &CancelToken::new(),
            )
            .await
            .unwrap();

        // Tamper with the captured hash inside snapshot.json
        let record = store.snapshot_dir(snap.id).join("snapshot.json");
        let mut stored: Snapshot =
            serde_json::from_slice(&std::fs::read(&record).unwrap()).unwrap();
        stored.manifests[0].hash = "0000".to_string();
        std::fs::write(&record, serde_json::to_vec_pretty(&stored).unwrap()).unwrap();

        assert!(!store.verify(snap.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_partition_snapshot_captures_only_its_container() {
        let (_dir, index, raid, store) = fixture().await;
        let mine = ContainerId::new();
        let other = ContainerId::new();
        put_object(&index, &raid, mine, "a.txt", b"a").await;
        put_object(&index, &raid, mine, "b.txt", b"b").await;
        put_object(&index, &raid, other, "c.txt", b"c").await;

        let snap = store
            .create(
                Granularity::Partition,
                Some(&mine.to_string()),
                "",
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(snap.manifests.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_copy_is_skipped_and_snapshot_still_seals() {
        let (_dir, index, raid, store) = fixture().await;
        let container = ContainerId::new();
        put_object(&index, &raid, container, "ok.txt", b"fine").await;
        // A manifest whose blob was never stored: the copy fails
        let ghost = Manifest::new(container, "ghost.txt", b"never stored");
        index.insert(ghost.clone()).await.unwrap();
        raid.delete(&ghost.blob_key()).await.unwrap();

        let snap = store
            .create(
                Granularity::Partition,
                Some(&container.to_string()),
                "",
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(snap.status, SnapshotStatus::Immutable);
        assert_eq!(snap.manifests.len(), 1);
        assert!(store.verify(snap.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_protected_snapshot_refuses_deletion() {
        let (_dir, index, raid, store) = fixture().await;
        let container = ContainerId::new();
        let m = put_object(&index, &raid, container, "a.txt", b"x").await;
        let snap = store
            .create(
                Granularity::SingleFile,
                Some(&m.id.to_string()),
                "",
                &CancelToken::new(),
            )
            .await
            .unwrap();

        store.set_protected(snap.id, true).await.unwrap();
        let err = store.delete(snap.id).await.unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::Denied);

        store.set_protected(snap.id, false).await.unwrap();
        store.delete(snap.id).await.unwrap();
        assert!(store.get(snap.id).is_err());
        assert!(!store.snapshot_dir(snap.id).exists());
    }

    #[tokio::test]
    async fn test_registry_reloads_from_disk() {
        let (dir, index, raid, store) = fixture().await;
        let container = ContainerId::new();
        let m = put_object(&index, &raid, container, "a.txt", b"x").await;
        let snap = store
            .create(
                Granularity::SingleFile,
                Some(&m.id.to_string()),
                "",
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let reopened = SnapshotStore::open(dir.path(), index.clone(), raid.clone()).unwrap();
        let loaded = reopened.get(snap.id).unwrap();
        assert_eq!(loaded.integrity_hash, snap.integrity_hash);
    }

    #[tokio::test]
    async fn test_complete_instance_copies_config_tree() {
        let (dir, index, raid, store) = fixture().await;
        let container = ContainerId::new();
        put_object(&index, &raid, container, "a.txt", b"x").await;
        std::fs::create_dir_all(dir.path().join("Config/nested")).unwrap();
        std::fs::write(dir.path().join("Config/warehouse.toml"), b"[core]").unwrap();
        std::fs::write(dir.path().join("Config/nested/extra.toml"), b"x = 1").unwrap();

        let snap = store
            .create(Granularity::CompleteInstance, None, "", &CancelToken::new())
            .await
            .unwrap();
        let copied = store.snapshot_dir(snap.id).join("Config/warehouse.toml");
        assert_eq!(std::fs::read(copied).unwrap(), b"[core]");
        assert!(store
            .snapshot_dir(snap.id)
            .join("Config/nested/extra.toml")
            .exists());
    }

    #[tokio::test]
    async fn test_cancelled_capture_marks_failed() {
        let (_dir, index, raid, store) = fixture().await;
        let container = ContainerId::new();
        put_object(&index, &raid, container, "a.txt", b"x").await;

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = store
            .create(
                Granularity::Partition,
                Some(&container.to_string()),
                "",
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), silo_core::ErrorKind::Cancelled);

        // The partial snapshot is recorded as Failed, not Immutable
        let failed: Vec<Snapshot> = store
            .list()
            .into_iter()
            .filter(|s| s.status == SnapshotStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
    }
}
