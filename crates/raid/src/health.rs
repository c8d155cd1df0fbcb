//! Device health tracking and the periodic health monitor
//!
//! Each pool member carries a three-state health record. Probes run on a
//! configurable interval (zero disables the monitor); three consecutive
//! probe failures advance the state one step, `Healthy → Degraded → Failed`.
//! A transition into `Failed` hands the device index to the engine's
//! failure callback, which starts a rebuild when `auto_rebuild` is set.

use dashmap::DashMap;
use silo_core::CancelToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Probe failures required to advance one health state.
const STRIKES_PER_TRANSITION: u32 = 3;

/// Health state of one pool member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DeviceHealth {
    /// Responding normally
    #[default]
    Healthy,
    /// Repeated probe failures; reads still attempted
    Degraded,
    /// Considered lost; reads skip it and rebuild targets it
    Failed,
}

#[derive(Debug, Default)]
struct HealthRecord {
    state: DeviceHealth,
    consecutive_failures: u32,
}

/// Concurrent per-device health table.
#[derive(Debug, Default)]
pub struct HealthTable {
    records: DashMap<usize, HealthRecord>,
}

impl HealthTable {
    /// Create an empty table; devices start `Healthy`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `device`.
    pub fn state(&self, device: usize) -> DeviceHealth {
        self.records
            .get(&device)
            .map(|r| r.state)
            .unwrap_or_default()
    }

    /// Whether `device` is marked `Failed`.
    pub fn is_failed(&self, device: usize) -> bool {
        self.state(device) == DeviceHealth::Failed
    }

    /// Record a successful probe; resets the failure streak.
    pub fn record_success(&self, device: usize) {
        let mut rec = self.records.entry(device).or_default();
        rec.consecutive_failures = 0;
        // A responding device that was merely degraded recovers; Failed
        // requires an explicit replacement.
        if rec.state == DeviceHealth::Degraded {
            rec.state = DeviceHealth::Healthy;
        }
    }

    /// Record a failed probe. Returns the new state when it transitioned.
    pub fn record_failure(&self, device: usize) -> Option<DeviceHealth> {
        let mut rec = self.records.entry(device).or_default();
        rec.consecutive_failures += 1;
        if rec.consecutive_failures >= STRIKES_PER_TRANSITION {
            rec.consecutive_failures = 0;
            let next = match rec.state {
                DeviceHealth::Healthy => DeviceHealth::Degraded,
                DeviceHealth::Degraded | DeviceHealth::Failed => DeviceHealth::Failed,
            };
            if next != rec.state {
                rec.state = next;
                return Some(next);
            }
        }
        None
    }

    /// Force `device` into `Failed`.
    pub fn mark_failed(&self, device: usize) {
        let mut rec = self.records.entry(device).or_default();
        rec.state = DeviceHealth::Failed;
        rec.consecutive_failures = 0;
    }

    /// Reset `device` to `Healthy` (after replacement).
    pub fn reset(&self, device: usize) {
        let mut rec = self.records.entry(device).or_default();
        rec.state = DeviceHealth::Healthy;
        rec.consecutive_failures = 0;
    }

    /// Indices currently marked `Failed`.
    pub fn failed_devices(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|e| e.value().state == DeviceHealth::Failed)
            .map(|e| *e.key())
            .collect()
    }

    /// Fraction of known devices not `Healthy`, for the composite health
    /// score.
    pub fn degraded_ratio(&self, device_count: usize) -> f64 {
        if device_count == 0 {
            return 0.0;
        }
        let unhealthy = self
            .records
            .iter()
            .filter(|e| e.value().state != DeviceHealth::Healthy)
            .count();
        unhealthy as f64 / device_count as f64
    }
}

/// Handle to the spawned health-monitor task.
pub struct HealthMonitor {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn a monitor probing each device every `interval`.
    ///
    /// `probe` checks one device and reports success; `on_failed` receives the
    /// index of a device that just transitioned into `Failed`.
    pub fn spawn<P, F, PFut>(
        device_count: usize,
        interval: Duration,
        table: Arc<HealthTable>,
        probe: P,
        on_failed: F,
    ) -> Self
    where
        P: Fn(usize) -> PFut + Send + Sync + 'static,
        PFut: std::future::Future<Output = bool> + Send + 'static,
        F: Fn(usize) + Send + Sync + 'static,
    {
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if task_cancel.is_cancelled() {
                    return;
                }
                for device in 0..device_count {
                    if table.is_failed(device) {
                        continue;
                    }
                    if probe(device).await {
                        table.record_success(device);
                    } else if let Some(state) = table.record_failure(device) {
                        warn!(device, ?state, "device health transition");
                        if state == DeviceHealth::Failed {
                            on_failed(device);
                        }
                    } else {
                        debug!(device, "device probe failed");
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    /// Stop the monitor and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_strikes_per_transition() {
        let table = HealthTable::new();
        assert_eq!(table.state(0), DeviceHealth::Healthy);

        assert!(table.record_failure(0).is_none());
        assert!(table.record_failure(0).is_none());
        assert_eq!(table.record_failure(0), Some(DeviceHealth::Degraded));

        assert!(table.record_failure(0).is_none());
        assert!(table.record_failure(0).is_none());
        assert_eq!(table.record_failure(0), Some(DeviceHealth::Failed));
        assert!(table.is_failed(0));
    }

    #[test]
    fn test_success_resets_streak_and_recovers_degraded() {
        let table = HealthTable::new();
        table.record_failure(0);
        table.record_failure(0);
        table.record_success(0);
        // Streak reset: three more failures only reach Degraded
        table.record_failure(0);
        table.record_failure(0);
        assert_eq!(table.record_failure(0), Some(DeviceHealth::Degraded));
        table.record_success(0);
        assert_eq!(table.state(0), DeviceHealth::Healthy);
    }

    #[test]
    fn test_failed_requires_explicit_reset() {
        let table = HealthTable::new();
        table.mark_failed(2);
        table.record_success(2);
        assert!(table.is_failed(2));
        table.reset(2);
        assert_eq!(table.state(2), DeviceHealth::Healthy);
    }

    #[test]
    fn test_degraded_ratio() {
        let table = HealthTable::new();
        table.mark_failed(0);
        assert!((table.degraded_ratio(4) - 0.25).abs() < f64::EPSILON);
        assert_eq!(table.degraded_ratio(0), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_marks_failed_and_notifies() {
        let table = Arc::new(HealthTable::new());
        let notified = Arc::new(std::sync::atomic::AtomicUsize::new(usize::MAX));
        let notified_clone = notified.clone();

        let monitor = HealthMonitor::spawn(
            2,
            Duration::from_secs(1),
            table.clone(),
            |device| async move { device != 1 },
            move |device| {
                notified_clone.store(device, std::sync::atomic::Ordering::SeqCst);
            },
        );

        // Six failing probes push device 1 through Degraded to Failed
        for _ in 0..7 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(table.state(0), DeviceHealth::Healthy);
        assert!(table.is_failed(1));
        assert_eq!(notified.load(std::sync::atomic::Ordering::SeqCst), 1);
        monitor.shutdown().await;
    }
}
