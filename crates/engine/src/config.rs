//! Warehouse configuration

use silo_backup::{BackupConfig, BackupKind};
use silo_raid::RaidConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a warehouse instance.
///
/// Use the builder methods to override defaults. Validation of the RAID
/// section happens when the warehouse opens.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Warehouse root directory (snapshots, backups, audit logs, keystore)
    pub root: PathBuf,
    /// Redundancy engine configuration
    pub raid: RaidConfig,
    /// Session lifetime
    pub session_ttl: Duration,
    /// Backup retention and archival
    pub backup: BackupConfig,
    /// Interval of the scheduled backup loop; `None` disables it
    pub backup_interval: Option<Duration>,
    /// Kind the scheduled loop requests
    pub scheduled_backup_kind: BackupKind,
    /// Memory-pressure polling interval
    pub pressure_interval: Duration,
    /// Audit flush interval
    pub audit_flush_interval: Duration,
    /// Bootstrap administrator username
    pub admin_username: String,
    /// Bootstrap administrator password
    pub admin_password: String,
}

impl WarehouseConfig {
    /// Configuration with defaults for everything but the root and RAID
    /// layout.
    pub fn new(root: impl Into<PathBuf>, raid: RaidConfig) -> Self {
        Self {
            root: root.into(),
            raid,
            session_ttl: silo_security::DEFAULT_SESSION_TTL,
            backup: BackupConfig::default(),
            backup_interval: None,
            scheduled_backup_kind: BackupKind::Incremental,
            pressure_interval: Duration::from_secs(30),
            audit_flush_interval: silo_audit::DEFAULT_FLUSH_INTERVAL,
            admin_username: "admin".to_string(),
            admin_password: "change-me".to_string(),
        }
    }

    /// Set the session lifetime.
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Enable the scheduled backup loop.
    pub fn backup_interval(mut self, interval: Duration) -> Self {
        self.backup_interval = Some(interval);
        self
    }

    /// Set the audit flush interval.
    pub fn audit_flush_interval(mut self, interval: Duration) -> Self {
        self.audit_flush_interval = interval;
        self
    }

    /// Set the bootstrap administrator credentials.
    pub fn admin(mut self, username: &str, password: &str) -> Self {
        self.admin_username = username.to_string();
        self.admin_password = password.to_string();
        self
    }
}
