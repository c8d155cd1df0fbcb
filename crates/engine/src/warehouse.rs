//! Warehouse facade
//!
//! The one type that owns all lower layers and runs the full pipeline the
//! system exists for. On write: authenticate (C8), authorize (C7), stripe
//! and persist (C2 via C1), register the manifest (C3), audit (C9), record
//! metrics (C11). On read the pipeline runs in reverse, with the redundancy
//! engine reconstructing from parity when devices are unhealthy.
//!
//! Both allow and deny outcomes are audited; only denies and system-level
//! failures are logged at WARN or above.

use parking_lot::Mutex;
use silo_audit::{AuditCategory, AuditEvent, AuditLogger};
use silo_backup::{BackupKind, BackupManager, BackupRecord, BackupScheduler};
use silo_core::{
    CancelToken, ContainerId, Container, Error, Granularity, Manifest, ManifestId, Permission,
    Result, SnapshotId,
};
use silo_device::DevicePool;
use silo_index::{ContentIndex, Predicate};
use silo_ops::{
    health_report, HealthInputs, HealthReport, MetricsRegistry, PressureManager,
};
use silo_raid::RaidEngine;
use silo_security::{AclEngine, Authenticator, Session, SessionStore};
use silo_snapshot::{
    RestoreAuth, RestoreOptions, RestoreReport, Snapshot, SnapshotBrowser, SnapshotStore,
};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;
use tracing::{info, warn};

use crate::config::WarehouseConfig;
use crate::supervisor::Supervisor;

/// Content-addressed data warehouse core.
pub struct Warehouse {
    config: WarehouseConfig,
    index: Arc<ContentIndex>,
    raid: Arc<RaidEngine>,
    acl: Arc<AclEngine>,
    auth: Arc<Authenticator>,
    snapshots: Arc<SnapshotStore>,
    backups: Arc<BackupManager>,
    audit: Arc<AuditLogger>,
    metrics: Arc<MetricsRegistry>,
    pressure: Arc<PressureManager>,
    system: Mutex<System>,
}

impl Warehouse {
    /// Open a warehouse over `pool` with the given configuration.
    ///
    /// Bootstraps the administrator account and the public container on
    /// first start.
    pub fn open(config: WarehouseConfig, pool: DevicePool) -> Result<Arc<Self>> {
        config.raid.validate()?;
        std::fs::create_dir_all(&config.root)?;

        let index = Arc::new(ContentIndex::new());
        let raid = Arc::new(RaidEngine::new(config.raid.clone(), pool)?);

        let auth = Arc::new(Authenticator::with_sessions(SessionStore::with_ttl(
            config.session_ttl,
        )));
        let admin = auth.register_user(
            &config.admin_username,
            &config.admin_password,
            silo_core::RoleTier::Admin,
            Vec::new(),
        )?;
        let acl = Arc::new(AclEngine::bootstrap(admin.id));

        let snapshots = Arc::new(SnapshotStore::open(
            &config.root,
            index.clone(),
            raid.clone(),
        )?);
        let backups = Arc::new(BackupManager::open(
            &config.root,
            index.clone(),
            raid.clone(),
            config.backup.clone(),
        )?);
        let audit = Arc::new(
            AuditLogger::new(&config.root)?.with_flush_interval(config.audit_flush_interval),
        );
        let metrics = Arc::new(MetricsRegistry::new());
        let pressure = Arc::new(PressureManager::new());

        info!(root = %config.root.display(), level = ?config.raid.level, "warehouse opened");
        Ok(Arc::new(Self {
            config,
            index,
            raid,
            acl,
            auth,
            snapshots,
            backups,
            audit,
            metrics,
            pressure,
            system: Mutex::new(System::new()),
        }))
    }

    /// Start the background tasks; the returned supervisor shuts them down
    /// in reverse start order.
    pub fn start_background(self: &Arc<Self>) -> Supervisor {
        let mut supervisor = Supervisor::new();

        if let Some(monitor) = self.raid.spawn_health_monitor() {
            supervisor.register("raid-health-monitor", move || monitor.shutdown());
        }

        let flusher = self.audit.spawn_flusher();
        supervisor.register("audit-flusher", move || flusher.shutdown());

        let pressure_monitor = self.pressure.spawn_monitor(self.config.pressure_interval);
        supervisor.register("pressure-monitor", move || pressure_monitor.shutdown());

        let sweep_auth = self.auth.clone();
        let sweep_cancel = CancelToken::new();
        let sweep_flag = sweep_cancel.clone();
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if sweep_flag.is_cancelled() {
                    return;
                }
                let purged = sweep_auth.sessions().purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "expired sessions swept");
                }
            }
        });
        supervisor.register("session-sweeper", move || async move {
            sweep_cancel.cancel();
            sweeper.abort();
            let _ = sweeper.await;
        });

        if let Some(interval) = self.config.backup_interval {
            let scheduler = BackupScheduler::spawn(
                self.backups.clone(),
                self.config.scheduled_backup_kind,
                interval,
            );
            supervisor.register("backup-scheduler", move || scheduler.shutdown());
        }

        supervisor
    }

    // ---- component accessors --------------------------------------------

    /// Authenticator (users, sessions, API keys).
    pub fn auth(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Container registry and ACL evaluator.
    pub fn acl(&self) -> &Arc<AclEngine> {
        &self.acl
    }

    /// Content index.
    pub fn index(&self) -> &Arc<ContentIndex> {
        &self.index
    }

    /// Redundancy engine.
    pub fn raid(&self) -> &Arc<RaidEngine> {
        &self.raid
    }

    /// Snapshot store.
    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    /// Snapshot browser.
    pub fn browser(&self) -> SnapshotBrowser {
        SnapshotBrowser::new(self.snapshots.clone())
    }

    /// Backup manager.
    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    /// Audit logger.
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Memory-pressure manager.
    pub fn pressure(&self) -> &Arc<PressureManager> {
        &self.pressure
    }

    /// Open the machine-encrypted keystore under `Security/keystore.dat`.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` when the `SILO_MASTER_KEY` environment
    /// variable is absent or malformed.
    pub fn open_keystore(&self) -> Result<silo_security::Keystore> {
        silo_security::Keystore::open(&self.config.root)
    }

    // ---- authentication -------------------------------------------------

    /// Authenticate with username and password.
    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        let result = self.auth.authenticate_password(username, password);
        self.audit.log(
            AuditEvent::new(AuditCategory::Authentication, "login")
                .actor("-", username)
                .outcome(result.is_ok()),
        );
        result
    }

    /// Authenticate with an API key.
    pub fn login_api_key(&self, secret: &str) -> Result<Session> {
        let result = self.auth.authenticate_api_key(secret);
        let name = result
            .as_ref()
            .map(|s| s.username.clone())
            .unwrap_or_else(|_| "api:?".to_string());
        self.audit.log(
            AuditEvent::new(AuditCategory::Authentication, "login_api_key")
                .actor("-", name)
                .outcome(result.is_ok()),
        );
        result
    }

    /// Log out: destroy the session.
    pub fn logout(&self, token: &str) {
        self.auth.sessions().revoke(token);
    }

    // ---- containers -----------------------------------------------------

    /// Create a container owned by the caller.
    pub fn create_container(&self, token: &str, name: &str) -> Result<Container> {
        let session = self.session(token)?;
        self.auth.authorize(&session, Permission::Write, None)?;
        let result = self.acl.create_container(name, session.user_id);
        self.audit.log(
            AuditEvent::new(AuditCategory::Security, "create_container")
                .actor(session.user_id.to_string(), session.username.clone())
                .resource("container", name)
                .outcome(result.is_ok()),
        );
        result
    }

    // ---- object pipeline ------------------------------------------------

    /// Store a blob in a container.
    pub async fn store_object(
        &self,
        token: &str,
        container_name: &str,
        relative_path: &str,
        bytes: &[u8],
        cancel: &CancelToken,
    ) -> Result<Manifest> {
        let start = Instant::now();
        if self.pressure.should_throttle() {
            return Err(Error::Throttled("memory pressure is severe".into()));
        }
        let session = self.session(token)?;
        let container = self.acl.find_by_name(container_name)?;
        self.authorize_audited(&session, Permission::Write, container.id, "store_object")?;

        let manifest = Manifest::new(container.id, relative_path, bytes);
        self.raid.store(&manifest.blob_key(), bytes, cancel).await?;
        // Device writes land before the manifest is registered; a reader
        // that sees the manifest sees a recoverable chunk set
        self.index.insert(manifest.clone()).await?;

        self.finish_op("store_object", &session, "manifest", &manifest.id.to_string(), start);
        Ok(manifest)
    }

    /// Fetch a blob by manifest id.
    pub async fn fetch_object(
        &self,
        token: &str,
        container_name: &str,
        manifest_id: ManifestId,
        cancel: &CancelToken,
    ) -> Result<(Manifest, Vec<u8>)> {
        let start = Instant::now();
        let session = self.session(token)?;
        let container = self.acl.find_by_name(container_name)?;
        self.authorize_audited(&session, Permission::Read, container.id, "fetch_object")?;

        let manifest = self.index.get(manifest_id).await?;
        if manifest.container != container.id {
            // Do not disclose which other container holds it
            return Err(Error::not_found(format!("manifest {manifest_id}")));
        }
        let bytes = self.raid.load(&manifest.blob_key(), cancel).await?;
        if silo_core::ContentHash::of(&bytes) != manifest.content_hash {
            return Err(Error::IntegrityFailure(format!(
                "manifest {manifest_id} bytes do not match their content hash"
            )));
        }
        self.index.touch(manifest_id);

        self.finish_op("fetch_object", &session, "manifest", &manifest_id.to_string(), start);
        Ok((manifest, bytes))
    }

    /// Delete an object. The blob itself is removed only when no other
    /// manifest shares its content hash and no snapshot references it.
    pub async fn delete_object(
        &self,
        token: &str,
        container_name: &str,
        manifest_id: ManifestId,
    ) -> Result<()> {
        let start = Instant::now();
        let session = self.session(token)?;
        let container = self.acl.find_by_name(container_name)?;
        self.authorize_audited(&session, Permission::Delete, container.id, "delete_object")?;

        let manifest = self.index.get(manifest_id).await?;
        if manifest.container != container.id {
            return Err(Error::not_found(format!("manifest {manifest_id}")));
        }

        let referenced = self
            .snapshots
            .list()
            .iter()
            .any(|s| s.manifests.iter().any(|m| m.manifest_id == manifest_id));
        if referenced {
            return Err(Error::Conflict(format!(
                "manifest {manifest_id} is referenced by a snapshot"
            )));
        }

        self.index.remove(manifest_id).await?;
        let shared = self
            .index
            .query(&Predicate::All)
            .await?
            .iter()
            .any(|m| m.content_hash == manifest.content_hash);
        if !shared {
            self.raid.delete(&manifest.blob_key()).await?;
        }

        self.finish_op("delete_object", &session, "manifest", &manifest_id.to_string(), start);
        Ok(())
    }

    // ---- snapshots ------------------------------------------------------

    /// Create a snapshot. The caller's tier must allow the permission the
    /// granularity requires.
    pub async fn create_snapshot(
        &self,
        token: &str,
        granularity: Granularity,
        target: Option<&str>,
        description: &str,
        cancel: &CancelToken,
    ) -> Result<Snapshot> {
        let session = self.session(token)?;
        let required = silo_snapshot::required_permission(granularity);
        if !session.tier.allows(required) {
            self.audit.log(
                AuditEvent::new(AuditCategory::Snapshot, "create_snapshot")
                    .actor(session.user_id.to_string(), session.username.clone())
                    .outcome(false),
            );
            return Err(Error::Denied(format!(
                "{:?} tier does not allow {required:?}",
                session.tier
            )));
        }
        let result = self
            .snapshots
            .create(granularity, target, description, cancel)
            .await;
        self.audit.log(
            AuditEvent::new(AuditCategory::Snapshot, "create_snapshot")
                .actor(session.user_id.to_string(), session.username.clone())
                .resource(
                    "snapshot",
                    result
                        .as_ref()
                        .map(|s| s.id.to_string())
                        .unwrap_or_else(|_| "-".to_string()),
                )
                .outcome(result.is_ok()),
        );
        result
    }

    /// Restore from a snapshot with the caller's permissions enforced.
    pub async fn restore_snapshot(
        &self,
        token: &str,
        id: SnapshotId,
        options: &RestoreOptions,
        cancel: &CancelToken,
    ) -> Result<RestoreReport> {
        let session = self.session(token)?;
        let result = self
            .snapshots
            .restore(
                id,
                options,
                Some(RestoreAuth {
                    session: &session,
                    acl: &self.acl,
                }),
                cancel,
            )
            .await;
        self.audit.log(
            AuditEvent::new(AuditCategory::Snapshot, "restore_snapshot")
                .actor(session.user_id.to_string(), session.username.clone())
                .resource("snapshot", id.to_string())
                .outcome(result.is_ok()),
        );
        result
    }

    /// Delete a snapshot.
    pub async fn delete_snapshot(&self, token: &str, id: SnapshotId) -> Result<()> {
        let session = self.session(token)?;
        self.auth.authorize(&session, Permission::Delete, None)?;
        let result = self.snapshots.delete(id).await;
        self.audit.log(
            AuditEvent::new(AuditCategory::Snapshot, "delete_snapshot")
                .actor(session.user_id.to_string(), session.username.clone())
                .resource("snapshot", id.to_string())
                .outcome(result.is_ok()),
        );
        result
    }

    // ---- backups --------------------------------------------------------

    /// Run a backup now. Admin tier only.
    pub async fn backup_now(
        &self,
        token: &str,
        kind: BackupKind,
        cancel: &CancelToken,
    ) -> Result<BackupRecord> {
        let session = self.session(token)?;
        self.auth.authorize(&session, Permission::FullControl, None)?;
        let result = self.backups.create_backup(kind, cancel).await;
        self.audit.log(
            AuditEvent::new(AuditCategory::Backup, "backup")
                .actor(session.user_id.to_string(), session.username.clone())
                .outcome(result.is_ok()),
        );
        result
    }

    // ---- health ---------------------------------------------------------

    /// Composite health over CPU, memory, device failures, RAID degradation
    /// and worst-case P99 latency.
    pub fn health(&self) -> HealthReport {
        let (cpu, memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = system.global_cpu_info().cpu_usage() as f64;
            let memory = if system.total_memory() == 0 {
                0.0
            } else {
                system.used_memory() as f64 / system.total_memory() as f64 * 100.0
            };
            (cpu, memory)
        };

        let snapshot = self.metrics.snapshot();
        let p99 = snapshot
            .histograms
            .values()
            .map(|h| h.p99)
            .fold(0.0_f64, f64::max);
        let ops: u64 = snapshot.counters.iter()
            .filter(|(k, _)| k.starts_with("silo_operations_total"))
            .map(|(_, v)| *v)
            .sum();
        let failures: u64 = snapshot.counters.iter()
            .filter(|(k, _)| k.starts_with("silo_operation_failures_total"))
            .map(|(_, v)| *v)
            .sum();
        let failure_ratio = if ops == 0 { 0.0 } else { failures as f64 / ops as f64 };

        health_report(HealthInputs {
            cpu_percent: cpu,
            memory_percent: memory,
            storage_failure_ratio: failure_ratio,
            raid_degraded_ratio: self
                .raid
                .health()
                .degraded_ratio(self.config.raid.device_count),
            p99_latency_ms: p99,
        })
    }

    // ---- internals ------------------------------------------------------

    fn session(&self, token: &str) -> Result<Session> {
        self.auth
            .validate_session(token)
            .ok_or_else(|| Error::Unauthenticated("missing or expired session".into()))
    }

    fn authorize_audited(
        &self,
        session: &Session,
        requested: Permission,
        container: ContainerId,
        action: &str,
    ) -> Result<()> {
        let result = self
            .auth
            .authorize(session, requested, Some((&self.acl, container)));
        if let Err(e) = &result {
            warn!(action, user = session.username.as_str(), error = %e, "authorization denied");
            self.metrics
                .inc_counter("silo_operation_failures_total", &[("op", action)], 1);
            self.audit.log(
                AuditEvent::new(AuditCategory::Authorization, action)
                    .actor(session.user_id.to_string(), session.username.clone())
                    .resource("container", container.to_string())
                    .outcome(false),
            );
        } else {
            self.audit.log(
                AuditEvent::new(AuditCategory::Authorization, action)
                    .actor(session.user_id.to_string(), session.username.clone())
                    .resource("container", container.to_string()),
            );
        }
        result
    }

    fn finish_op(
        &self,
        action: &str,
        session: &Session,
        resource_kind: &str,
        resource_id: &str,
        start: Instant,
    ) {
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .inc_counter("silo_operations_total", &[("op", action)], 1);
        self.metrics
            .observe("silo_operation_ms", &[("op", action)], elapsed_ms);
        self.audit.log(
            AuditEvent::new(AuditCategory::Storage, action)
                .actor(session.user_id.to_string(), session.username.clone())
                .resource(resource_kind, resource_id),
        );
    }
}
