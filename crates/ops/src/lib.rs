//! Operational concerns for Silo
//!
//! - PressureManager: tiered eviction/throttle response to heap usage
//! - MetricsRegistry: counters, gauges, bounded-ring histograms with
//!   percentile snapshots and Prometheus text exposition
//! - health: composite health score over CPU, memory, storage failures,
//!   RAID degradation and P99 latency

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod health;
pub mod metrics;
pub mod pressure;

pub use health::{health_report, health_score, HealthInputs, HealthReport, HealthStatus};
pub use metrics::{
    metric_key, HistogramSnapshot, MetricsRegistry, MetricsSnapshot, HISTOGRAM_WINDOW,
};
pub use pressure::{
    FixedSampler, MemorySample, MemorySampler, PressureLevel, PressureManager, PressureMonitor,
    SysinfoSampler,
};
