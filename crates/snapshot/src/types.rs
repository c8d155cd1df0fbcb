//! Snapshot record types
//!
//! A snapshot is an immutable, hash-sealed capture of a set of manifests and
//! their bytes. Once status reaches `Immutable` no field other than the
//! protection flag may change; the integrity hash is a deterministic digest
//! over the captured content hashes in ascending manifest-id order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use silo_core::{ContainerId, Granularity, ManifestId, SnapshotId};

/// Lifecycle state of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    /// Capture in progress; not yet readable
    Creating,
    /// Sealed; contents and hash are final
    Immutable,
    /// Capture aborted; directory may hold partial data
    Failed,
}

/// One captured file within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Manifest this entry was captured from
    pub manifest_id: ManifestId,
    /// Container the manifest belonged to at capture
    pub container: ContainerId,
    /// Path relative to the snapshot's `data/` directory
    pub relative_path: String,
    /// Byte length at capture
    pub size: u64,
    /// Content hash at capture (hex)
    pub hash: String,
    /// Modification timestamp at capture (UTC)
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

/// Point-in-time capture record, serialized to `snapshot.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Stable identifier
    pub id: SnapshotId,
    /// Capture granularity
    pub granularity: Granularity,
    /// Target identifier for narrow granularities
    pub target: Option<String>,
    /// Capture time (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Free-form description
    pub description: String,
    /// Lifecycle state
    pub status: SnapshotStatus,
    /// Sealed integrity hash (uppercase hex)
    pub integrity_hash: String,
    /// Protected snapshots cannot be deleted
    pub protected: bool,
    /// Captured files, in capture order
    pub manifests: Vec<SnapshotManifest>,
}

impl Snapshot {
    /// Start a new capture in `Creating` state.
    pub fn begin(
        granularity: Granularity,
        target: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            granularity,
            target,
            timestamp: chrono::Utc::now(),
            description: description.into(),
            status: SnapshotStatus::Creating,
            integrity_hash: String::new(),
            protected: false,
            manifests: Vec::new(),
        }
    }

    /// Compute the integrity hash over the current snapshot-manifests.
    ///
    /// SHA-256 of the UTF-8 concatenation of each entry's content hash in
    /// ascending manifest-id order, rendered as uppercase hex. Creation and
    /// verification both call this, so they cannot disagree on ordering.
    pub fn compute_integrity_hash(&self) -> String {
        let mut entries: Vec<&SnapshotManifest> = self.manifests.iter().collect();
        entries.sort_by_key(|m| m.manifest_id);
        let mut hasher = Sha256::new();
        for entry in entries {
            hasher.update(entry.hash.as_bytes());
        }
        hex::encode_upper(hasher.finalize())
    }

    /// Total bytes captured.
    pub fn total_size(&self) -> u64 {
        self.manifests.iter().map(|m| m.size).sum()
    }

    /// Entry whose relative path equals `path` (case-sensitive).
    pub fn entry(&self, path: &str) -> Option<&SnapshotManifest> {
        self.manifests.iter().find(|m| m.relative_path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, hash: &str) -> SnapshotManifest {
        SnapshotManifest {
            manifest_id: ManifestId::new(),
            container: ContainerId::new(),
            relative_path: path.to_string(),
            size: 1,
            hash: hash.to_string(),
            captured_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_integrity_hash_of_single_entry() {
        let mut snap = Snapshot::begin(Granularity::SingleFile, None, "");
        snap.manifests.push(entry("f", "abc"));
        // SHA-256("abc"), uppercase
        assert_eq!(
            snap.compute_integrity_hash(),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn test_integrity_hash_is_id_ordered() {
        let mut a = Snapshot::begin(Granularity::Partition, None, "");
        a.manifests.push(entry("x", "h1"));
        a.manifests.push(entry("y", "h2"));

        // Same entries, reversed insertion order
        let mut b = a.clone();
        b.manifests.reverse();

        assert_eq!(a.compute_integrity_hash(), b.compute_integrity_hash());
    }

    #[test]
    fn test_integrity_hash_changes_with_content() {
        let mut snap = Snapshot::begin(Granularity::Partition, None, "");
        snap.manifests.push(entry("x", "h1"));
        let sealed = snap.compute_integrity_hash();
        snap.manifests[0].hash = "tampered".to_string();
        assert_ne!(snap.compute_integrity_hash(), sealed);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut snap = Snapshot::begin(Granularity::StoragePool, Some("hot".into()), "nightly");
        snap.manifests.push(entry("a/b.txt", "deadbeef"));
        snap.status = SnapshotStatus::Immutable;
        snap.integrity_hash = snap.compute_integrity_hash();

        let json = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, snap.id);
        assert_eq!(back.integrity_hash, snap.integrity_hash);
        assert_eq!(back.manifests, snap.manifests);
    }
}
