//! Snapshot browser
//!
//! Read-only views over sealed snapshots: timeline grouping, directory
//! listing, diffing, per-file history and path search.
//!
//! The directory-listing rules, normative: with `path` stripped of leading
//! and trailing slashes and each captured path `p` stripped of its leading
//! slash,
//! - `p` is a **file** of the directory iff it starts with `path + "/"` and
//!   the remainder contains no `/` (or `path` is empty and `p` has no `/`);
//! - `p` contributes a **subdirectory** iff it starts with `path + "/"` (or
//!   `path` is empty) and the remainder has at least one `/`; the
//!   subdirectory name is the first segment of the remainder, deduplicated
//!   case-sensitively.

use silo_core::{Granularity, Result, SnapshotId};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::store::SnapshotStore;
use crate::types::{Snapshot, SnapshotManifest};

/// Contents of one directory within a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryListing {
    /// Files directly in the directory
    pub files: Vec<SnapshotManifest>,
    /// Names of immediate subdirectories, sorted, case-sensitively unique
    pub directories: Vec<String>,
}

/// Paths that differ between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Paths only in the second snapshot
    pub added: Vec<String>,
    /// Paths only in the first snapshot
    pub removed: Vec<String>,
    /// Paths in both with different content hashes
    pub modified: Vec<String>,
}

impl SnapshotDiff {
    /// Whether the two snapshots captured identical content.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// One version of a file across the snapshot timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FileVersion {
    /// Snapshot holding this version
    pub snapshot_id: SnapshotId,
    /// Snapshot capture time
    pub snapshot_time: chrono::DateTime<chrono::Utc>,
    /// Size at capture
    pub size: u64,
    /// Content hash at capture
    pub hash: String,
}

/// One day of the snapshot timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineGroup {
    /// Calendar day (UTC)
    pub date: chrono::NaiveDate,
    /// Snapshots taken that day, newest first
    pub snapshots: Vec<TimelineEntry>,
}

/// Summary of one snapshot in the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// Snapshot id
    pub id: SnapshotId,
    /// Capture time
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Capture granularity
    pub granularity: Granularity,
    /// Description given at creation
    pub description: String,
    /// Number of captured files
    pub file_count: usize,
}

/// A search hit: the snapshot and the matching entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Snapshot containing the match
    pub snapshot_id: SnapshotId,
    /// Matching captured file
    pub entry: SnapshotManifest,
}

/// Read-only browsing facade over a [`SnapshotStore`].
pub struct SnapshotBrowser {
    store: Arc<SnapshotStore>,
}

impl SnapshotBrowser {
    /// Create a browser over `store`.
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    /// Snapshots grouped by UTC day, newest day and newest snapshot first.
    pub fn timeline(&self) -> Vec<TimelineGroup> {
        let mut snapshots = self.store.list();
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut groups: Vec<TimelineGroup> = Vec::new();
        for snapshot in snapshots {
            let date = snapshot.timestamp.date_naive();
            let entry = TimelineEntry {
                id: snapshot.id,
                timestamp: snapshot.timestamp,
                granularity: snapshot.granularity,
                description: snapshot.description.clone(),
                file_count: snapshot.manifests.len(),
            };
            match groups.last_mut() {
                Some(group) if group.date == date => group.snapshots.push(entry),
                _ => groups.push(TimelineGroup {
                    date,
                    snapshots: vec![entry],
                }),
            }
        }
        groups
    }

    /// List one directory inside a snapshot.
    pub fn list_directory(&self, id: SnapshotId, path: &str) -> Result<DirectoryListing> {
        let snapshot = self.store.get(id)?;
        Ok(list_directory_in(&snapshot, path))
    }

    /// Differences from snapshot `a` to snapshot `b`.
    pub fn diff(&self, a: SnapshotId, b: SnapshotId) -> Result<SnapshotDiff> {
        let first = self.store.get(a)?;
        let second = self.store.get(b)?;
        Ok(diff_snapshots(&first, &second))
    }

    /// Versions of the file at `path` across snapshots, newest first.
    ///
    /// Matching is case-insensitive; file history is the one browse surface
    /// that tolerates case drift between captures.
    pub fn file_history(
        &self,
        path: &str,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Vec<FileVersion> {
        let mut snapshots = self.store.list();
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        snapshots
            .iter()
            .filter(|s| start.map_or(true, |t| s.timestamp >= t))
            .filter(|s| end.map_or(true, |t| s.timestamp <= t))
            .filter_map(|s| {
                s.manifests
                    .iter()
                    .find(|m| m.relative_path.eq_ignore_ascii_case(path))
                    .map(|m| FileVersion {
                        snapshot_id: s.id,
                        snapshot_time: s.timestamp,
                        size: m.size,
                        hash: m.hash.clone(),
                    })
            })
            .collect()
    }

    /// Substring search on captured paths across all snapshots.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        for snapshot in self.store.list() {
            for entry in &snapshot.manifests {
                if entry.relative_path.contains(query) {
                    hits.push(SearchHit {
                        snapshot_id: snapshot.id,
                        entry: entry.clone(),
                    });
                }
            }
        }
        hits
    }
}

/// List one directory of a snapshot record, per the rules in the module
/// documentation.
pub fn list_directory_in(snapshot: &Snapshot, path: &str) -> DirectoryListing {
    let path = path.trim_matches('/');

    let mut files = Vec::new();
    let mut directories = BTreeSet::new();
    for entry in &snapshot.manifests {
        let p = entry.relative_path.trim_start_matches('/');
        let remainder = if path.is_empty() {
            p
        } else {
            match p.strip_prefix(path).and_then(|r| r.strip_prefix('/')) {
                Some(r) => r,
                None => continue,
            }
        };
        match remainder.split_once('/') {
            None if !remainder.is_empty() => files.push(entry.clone()),
            Some((first, _)) => {
                directories.insert(first.to_string());
            }
            None => {}
        }
    }
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    DirectoryListing {
        files,
        directories: directories.into_iter().collect(),
    }
}

/// Pure diff over two snapshot records.
pub fn diff_snapshots(a: &Snapshot, b: &Snapshot) -> SnapshotDiff {
    let index_a: std::collections::HashMap<&str, &str> = a
        .manifests
        .iter()
        .map(|m| (m.relative_path.as_str(), m.hash.as_str()))
        .collect();
    let index_b: std::collections::HashMap<&str, &str> = b
        .manifests
        .iter()
        .map(|m| (m.relative_path.as_str(), m.hash.as_str()))
        .collect();

    let mut diff = SnapshotDiff::default();
    for (path, hash) in &index_b {
        match index_a.get(path) {
            None => diff.added.push((*path).to_string()),
            Some(old) if old != hash => diff.modified.push((*path).to_string()),
            Some(_) => {}
        }
    }
    for path in index_a.keys() {
        if !index_b.contains_key(path) {
            diff.removed.push((*path).to_string());
        }
    }
    diff.added.sort();
    diff.removed.sort();
    diff.modified.sort();
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::{ContainerId, ManifestId};
    use crate::types::SnapshotStatus;

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

    fn snapshot_with(paths: &[(&str, &str)]) -> Snapshot {
        let mut s = Snapshot::begin(Granularity::Partition, None, "");
        for (path, hash) in paths {
            s.manifests.push(entry(path, hash));
        }
        s.status = SnapshotStatus::Immutable;
        s
    }

    fn listing_of(snapshot: &Snapshot, path: &str) -> DirectoryListing {
        list_directory_in(snapshot, path)
    }

    #[test]
    fn test_directory_listing_root() {
        let snap = snapshot_with(&[
            ("readme.md", "h1"),
            ("docs/guide.md", "h2"),
            ("docs/api/v1.md", "h3"),
            ("img/logo.png", "h4"),
        ]);
        let listing = listing_of(&snap, "");
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].relative_path, "readme.md");
        assert_eq!(listing.directories, vec!["docs".to_string(), "img".to_string()]);
    }

    #[test]
    fn test_directory_listing_nested_and_slashes() {
        let snap = snapshot_with(&[
            ("/docs/guide.md", "h1"),
            ("docs/api/v1.md", "h2"),
            ("docs/api/v2.md", "h3"),
            ("docsx/other.md", "h4"),
        ]);
        // Leading/trailing slashes on the query are stripped
        let listing = listing_of(&snap, "/docs/");
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].relative_path, "/docs/guide.md");
        assert_eq!(listing.directories, vec!["api".to_string()]);
        // "docsx" does not leak into "docs": the prefix match requires "/"
        let listing = listing_of(&snap, "docs/api");
        assert_eq!(listing.files.len(), 2);
        assert!(listing.directories.is_empty());
    }

    #[test]
    fn test_directory_names_dedup_case_sensitively() {
        let snap = snapshot_with(&[("Docs/a.md", "h1"), ("docs/b.md", "h2"), ("docs/c.md", "h3")]);
        let listing = listing_of(&snap, "");
        assert_eq!(
            listing.directories,
            vec!["Docs".to_string(), "docs".to_string()]
        );
    }

    #[test]
    fn test_diff() {
        let a = snapshot_with(&[("keep.txt", "same"), ("gone.txt", "x"), ("edit.txt", "v1")]);
        let b = snapshot_with(&[("keep.txt", "same"), ("new.txt", "y"), ("edit.txt", "v2")]);
        let diff = diff_snapshots(&a, &b);
        assert_eq!(diff.added, vec!["new.txt".to_string()]);
        assert_eq!(diff.removed, vec!["gone.txt".to_string()]);
        assert_eq!(diff.modified, vec!["edit.txt".to_string()]);
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_diff_empty_iff_hashes_identical() {
        let a = snapshot_with(&[("a.txt", "h1"), ("b.txt", "h2")]);
        let b = snapshot_with(&[("a.txt", "h1"), ("b.txt", "h2")]);
        assert!(diff_snapshots(&a, &b).is_empty());
    }
}
