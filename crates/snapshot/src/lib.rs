//! Snapshot and restore engine for Silo
//!
//! This crate implements point-in-time captures and their read paths:
//! - Snapshot / SnapshotManifest: immutable, hash-sealed records
//! - SnapshotStore: creation at seven granularities, verification,
//!   protection, deletion
//! - restore: conflict-resolving selective restore with timestamp
//!   preservation and optional re-indexing
//! - SnapshotBrowser: timeline, directory listing, diff, file history,
//!   search

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod browser;
pub mod restore;
pub mod store;
pub mod types;

pub use browser::{
    diff_snapshots, list_directory_in, DirectoryListing, FileVersion, SearchHit, SnapshotBrowser,
    SnapshotDiff, TimelineEntry, TimelineGroup,
};
pub use restore::{
    required_permission, ConflictResolution, RestoreAuth, RestoreOptions, RestoreReport,
};
pub use store::SnapshotStore;
pub use types::{Snapshot, SnapshotManifest, SnapshotStatus};
