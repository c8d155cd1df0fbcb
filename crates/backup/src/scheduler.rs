//! Backup scheduler
//!
//! A cooperative loop creating backups at a fixed interval. The loop owns a
//! cancellation token; shutdown stops the next tick and joins the task.

use silo_core::CancelToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::manager::{BackupKind, BackupManager};

/// Handle to the scheduler loop.
pub struct BackupScheduler {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl BackupScheduler {
    /// Spawn a loop creating a backup of `kind` every `interval`.
    pub fn spawn(manager: Arc<BackupManager>, kind: BackupKind, interval: Duration) -> Self {
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the loop waits a
            // full interval before its first backup
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if task_cancel.is_cancelled() {
                    return;
                }
                match manager.create_backup(kind, &task_cancel).await {
                    Ok(record) => {
                        info!(backup = %record.id, files = record.entries.len(), "scheduled backup completed");
                    }
                    Err(e) => {
                        warn!(error = %e, "scheduled backup failed");
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    /// Stop the loop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
        let _ = self.handle.await;
    }
}
