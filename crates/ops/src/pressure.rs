//! Memory-pressure manager
//!
//! Polls heap usage against system memory and classifies it into four
//! levels: `Normal < 70% ≤ Warning < 85% ≤ Critical < 95% ≤ Severe`. Each
//! upward transition invokes the registered eviction handlers, one at a
//! time, with a byte target of 10% / 25% / 50% of the current heap for
//! Warning / Critical / Severe. Handlers must not call back into pressure
//! operations; the handler lock is held while they run and reentry would
//! deadlock.
//!
//! Rust has no runtime-level compacting GC to force at Critical/Severe, so
//! the eviction targets are the whole of the response here.
//!
//! Three consecutive Severe samples raise an operator-visible alert.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use silo_core::CancelToken;
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Consecutive Severe samples that raise the alert.
const SEVERE_ALERT_STREAK: u32 = 3;

/// Classified memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    /// Below 70% of system memory
    Normal = 0,
    /// At or above 70%
    Warning = 1,
    /// At or above 85%
    Critical = 2,
    /// At or above 95%
    Severe = 3,
}

impl PressureLevel {
    /// Classify a usage percentage.
    pub fn classify(percent: f64) -> Self {
        if percent >= 95.0 {
            PressureLevel::Severe
        } else if percent >= 85.0 {
            PressureLevel::Critical
        } else if percent >= 70.0 {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    fn from_index(index: u8) -> Self {
        match index {
            0 => PressureLevel::Normal,
            1 => PressureLevel::Warning,
            2 => PressureLevel::Critical,
            _ => PressureLevel::Severe,
        }
    }

    /// Fraction of the current heap that eviction should free at this level.
    pub fn eviction_fraction(&self) -> f64 {
        match self {
            PressureLevel::Normal => 0.0,
            PressureLevel::Warning => 0.10,
            PressureLevel::Critical => 0.25,
            PressureLevel::Severe => 0.50,
        }
    }
}

/// One memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    /// Bytes used by this process
    pub used_bytes: u64,
    /// Total system memory in bytes
    pub total_bytes: u64,
}

impl MemorySample {
    /// Usage as a percentage of total memory.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Source of memory readings.
pub trait MemorySampler: Send + Sync {
    /// Take one reading.
    fn sample(&self) -> MemorySample;
}

/// `sysinfo`-backed sampler: process RSS against total system memory.
pub struct SysinfoSampler {
    system: Mutex<System>,
    pid: Pid,
}

impl SysinfoSampler {
    /// Create a sampler for the current process.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::new().with_memory(sysinfo::MemoryRefreshKind::everything()),
            )),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&self) -> MemorySample {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_process_specifics(self.pid, ProcessRefreshKind::new().with_memory());
        let used = system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or_default();
        MemorySample {
            used_bytes: used,
            total_bytes: system.total_memory(),
        }
    }
}

/// Fixed-percentage sampler for tests.
pub struct FixedSampler {
    percent_x100: Arc<AtomicU64>,
}

impl FixedSampler {
    /// Create a sampler reporting `percent` of a 1 GiB machine.
    pub fn new(percent: f64) -> (Self, Arc<AtomicU64>) {
        let cell = Arc::new(AtomicU64::new((percent * 100.0) as u64));
        (
            Self {
                percent_x100: cell.clone(),
            },
            cell,
        )
    }
}

impl MemorySampler for FixedSampler {
    fn sample(&self) -> MemorySample {
        let total: u64 = 1 << 30;
        let percent = self.percent_x100.load(Ordering::Acquire) as f64 / 100.0;
        MemorySample {
            used_bytes: (total as f64 * percent / 100.0) as u64,
            total_bytes: total,
        }
    }
}

type EvictionHandler = Box<dyn Fn(u64) + Send + Sync>;

/// Tiered eviction/throttle response to heap usage.
pub struct PressureManager {
    sampler: Box<dyn MemorySampler>,
    level: AtomicU8,
    handlers: Mutex<Vec<(String, EvictionHandler)>>,
    severe_streak: AtomicU32,
    alerts_raised: AtomicU32,
}

impl PressureManager {
    /// Create a manager over the default sysinfo sampler.
    pub fn new() -> Self {
        Self::with_sampler(Box::new(SysinfoSampler::new()))
    }

    /// Create a manager over a custom sampler.
    pub fn with_sampler(sampler: Box<dyn MemorySampler>) -> Self {
        Self {
            sampler,
            level: AtomicU8::new(PressureLevel::Normal as u8),
            handlers: Mutex::new(Vec::new()),
            severe_streak: AtomicU32::new(0),
            alerts_raised: AtomicU32::new(0),
        }
    }

    /// Register an eviction handler, called with a byte target on upward
    /// transitions. Handlers run one at a time and must not call back into
    /// this manager.
    pub fn register_eviction_handler(
        &self,
        name: impl Into<String>,
        handler: impl Fn(u64) + Send + Sync + 'static,
    ) {
        self.handlers.lock().push((name.into(), Box::new(handler)));
    }

    /// Current pressure level as of the last check.
    pub fn current_level(&self) -> PressureLevel {
        PressureLevel::from_index(self.level.load(Ordering::Acquire))
    }

    /// Whether work should be shed entirely.
    pub fn should_throttle(&self) -> bool {
        self.current_level() >= PressureLevel::Severe
    }

    /// Halve the batch size once per pressure level: `default >> level`.
    pub fn recommended_batch_size(&self, default: usize) -> usize {
        (default >> self.current_level() as u8).max(1)
    }

    /// Alerts raised so far (three consecutive Severe samples each).
    pub fn alerts_raised(&self) -> u32 {
        self.alerts_raised.load(Ordering::Acquire)
    }

    /// Take one sample, classify it, and run the transition response.
    pub fn check(&self) -> PressureLevel {
        let sample = self.sampler.sample();
        let level = PressureLevel::classify(sample.percent());
        let previous = PressureLevel::from_index(
            self.level.swap(level as u8, Ordering::AcqRel),
        );

        if level == PressureLevel::Severe {
            let streak = self.severe_streak.fetch_add(1, Ordering::AcqRel) + 1;
            if streak == SEVERE_ALERT_STREAK {
                self.alerts_raised.fetch_add(1, Ordering::AcqRel);
                error!(
                    percent = sample.percent(),
                    "memory pressure has been Severe for {SEVERE_ALERT_STREAK} consecutive checks"
                );
            }
        } else {
            self.severe_streak.store(0, Ordering::Release);
        }

        if level > previous && level > PressureLevel::Normal {
            let target = (sample.used_bytes as f64 * level.eviction_fraction()) as u64;
            info!(?previous, ?level, target, "pressure transition, requesting eviction");
            let handlers = self.handlers.lock();
            for (name, handler) in handlers.iter() {
                handler(target);
                tracing::debug!(handler = name.as_str(), target, "eviction handler ran");
            }
        } else if level < previous {
            warn!(?previous, ?level, "memory pressure eased");
        }

        level
    }

    /// Spawn a polling task checking every `interval`.
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration) -> PressureMonitor {
        let manager = self.clone();
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
                manager.check();
            }
        });
        PressureMonitor { cancel, handle }
    }
}

impl Default for PressureManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the polling task.
pub struct PressureMonitor {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl PressureMonitor {
    /// Stop the monitor.
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
    fn test_classification_thresholds() {
        assert_eq!(PressureLevel::classify(0.0), PressureLevel::Normal);
        assert_eq!(PressureLevel::classify(69.9), PressureLevel::Normal);
        assert_eq!(PressureLevel::classify(70.0), PressureLevel::Warning);
        assert_eq!(PressureLevel::classify(84.9), PressureLevel::Warning);
        assert_eq!(PressureLevel::classify(85.0), PressureLevel::Critical);
        assert_eq!(PressureLevel::classify(95.0), PressureLevel::Severe);
        assert_eq!(PressureLevel::classify(100.0), PressureLevel::Severe);
    }

    #[test]
    fn test_transition_invokes_handlers_with_target() {
        let (sampler, cell) = FixedSampler::new(50.0);
        let manager = PressureManager::with_sampler(Box::new(sampler));
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();
        manager.register_eviction_handler("cache", move |target| {
            seen_clone.store(target, Ordering::SeqCst);
        });

        assert_eq!(manager.check(), PressureLevel::Normal);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        // 90% of 1 GiB used; Critical asks for 25% of the heap back
        cell.store(9000, Ordering::SeqCst);
        assert_eq!(manager.check(), PressureLevel::Critical);
        let expected = ((1u64 << 30) as f64 * 0.90 * 0.25) as u64;
        assert_eq!(seen.load(Ordering::SeqCst), expected);
    }

    #[test]
    fn test_throttle_and_batch_size() {
        let (sampler, cell) = FixedSampler::new(96.0);
        let manager = PressureManager::with_sampler(Box::new(sampler));
        manager.check();
        assert!(manager.should_throttle());
        assert_eq!(manager.recommended_batch_size(64), 8);

        cell.store(7100, Ordering::SeqCst);
        manager.check();
        assert!(!manager.should_throttle());
        assert_eq!(manager.recommended_batch_size(64), 32);

        cell.store(1000, Ordering::SeqCst);
        manager.check();
        assert_eq!(manager.recommended_batch_size(64), 64);
        // Never collapses to zero
        assert_eq!(manager.recommended_batch_size(0), 1);
    }

    #[test]
    fn test_three_consecutive_severe_raise_alert() {
        let (sampler, cell) = FixedSampler::new(96.0);
        let manager = PressureManager::with_sampler(Box::new(sampler));
        manager.check();
        manager.check();
        assert_eq!(manager.alerts_raised(), 0);
        manager.check();
        assert_eq!(manager.alerts_raised(), 1);
        // Staying Severe does not re-raise
        manager.check();
        assert_eq!(manager.alerts_raised(), 1);

        // Dropping out of Severe resets the streak
        cell.store(5000, Ordering::SeqCst);
        manager.check();
        cell.store(9600, Ordering::SeqCst);
        manager.check();
        manager.check();
        manager.check();
        assert_eq!(manager.alerts_raised(), 2);
    }
}
