//! Silo: content-addressed data warehouse core
//!
//! A pluggable storage engine that durably stores immutable blobs under a
//! content-addressed namespace, protects them with a RAID-style redundancy
//! engine, and supports hash-sealed point-in-time snapshots with granular
//! restore, all behind an authenticated, ACL-gated facade.
//!
//! This crate re-exports the public surface of the workspace members:
//!
//! ```no_run
//! use silodb::{Warehouse, WarehouseConfig};
//! use silodb::raid::{RaidConfig, RaidLevel};
//! use silodb::device::{DevicePool, MemoryDevice, StorageDevice};
//! use std::sync::Arc;
//!
//! let pool = DevicePool::new(
//!     (0..3)
//!         .map(|_| Arc::new(MemoryDevice::new()) as Arc<dyn StorageDevice>)
//!         .collect(),
//! )
//! .unwrap();
//! let config = WarehouseConfig::new("/var/lib/silo", RaidConfig::new(RaidLevel::L5, 3))
//!     .admin("admin", "bootstrap-password");
//! let warehouse = Warehouse::open(config, pool).unwrap();
//! let _supervisor = warehouse.start_background();
//! ```

#![warn(missing_docs)]

pub use silo_core::{
    AclSubject, CancelToken, Container, ContainerId, ContentHash, Error, ErrorKind, Granularity,
    Manifest, ManifestId, Permission, Result, RoleTier, SnapshotId, UserId,
};
pub use silo_engine::{Supervisor, Warehouse, WarehouseConfig};

/// Storage device abstraction and built-in devices.
pub mod device {
    pub use silo_device::{
        validate_external_target, DevicePool, FileDevice, MemoryDevice, StorageDevice,
    };
}

/// Redundancy engine.
pub mod raid {
    pub use silo_raid::{
        rebuild_device, DeviceHealth, HealthTable, ParityAlgorithm, RaidConfig, RaidEngine,
        RaidLevel, RebuildReport, DEFAULT_STRIPE_SIZE,
    };
}

/// Content index.
pub mod index {
    pub use silo_index::{
        ContainerLocation, ContentIndex, FieldFilter, FilterField, FilterOp, ManifestCursor,
        ManifestStore, Predicate,
    };
}

/// Snapshots, restore and browsing.
pub mod snapshot {
    pub use silo_snapshot::{
        diff_snapshots, required_permission, ConflictResolution, DirectoryListing, FileVersion,
        RestoreOptions, RestoreReport, Snapshot, SnapshotBrowser, SnapshotDiff, SnapshotManifest,
        SnapshotStatus, SnapshotStore, TimelineEntry, TimelineGroup,
    };
}

/// Authentication, sessions and ACLs.
pub mod security {
    pub use silo_security::{
        AclEngine, ApiKey, AuthMethod, Authenticator, Caller, Keystore, PasswordHash, Session,
        SessionStore, MASTER_KEY_ENV, PUBLIC_CONTAINER,
    };
}

/// Audit logging.
pub mod audit {
    pub use silo_audit::{AuditCategory, AuditEvent, AuditLogger, AuditQuery, AuditSeverity};
}

/// Metrics, health and memory pressure.
pub mod ops {
    pub use silo_ops::{
        health_report, HealthInputs, HealthReport, HealthStatus, HistogramSnapshot,
        MetricsRegistry, PressureLevel, PressureManager,
    };
}

/// Backups.
pub mod backup {
    pub use silo_backup::{
        BackupConfig, BackupKind, BackupManager, BackupRecord, BackupScheduler, BackupStatus,
        ExternalBackupTarget,
    };
}
