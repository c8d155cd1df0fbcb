//! Composite health score
//!
//! Folds CPU, memory, storage failure ratio, RAID degradation and P99
//! latency into one 0–100 score. Resource usage costs up to 20 points each,
//! failure ratios up to 25 each, and P99 latency up to 10 (saturating at one
//! second).

/// Inputs to the composite score.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HealthInputs {
    /// CPU usage, 0–100
    pub cpu_percent: f64,
    /// Memory usage, 0–100
    pub memory_percent: f64,
    /// Failed device operations / total, 0–1
    pub storage_failure_ratio: f64,
    /// Devices not Healthy / pool size, 0–1
    pub raid_degraded_ratio: f64,
    /// P99 operation latency in milliseconds
    pub p99_latency_ms: f64,
}

/// Coarse status derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Score ≥ 80
    Healthy,
    /// Score ≥ 50
    Degraded,
    /// Below 50
    Unhealthy,
}

/// Score plus its inputs, for operator surfaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthReport {
    /// Composite score, 0–100
    pub score: f64,
    /// Coarse status
    pub status: HealthStatus,
    /// The inputs that produced the score
    pub inputs: HealthInputs,
}

/// Compute the composite score.
pub fn health_score(inputs: &HealthInputs) -> f64 {
    let cpu = (inputs.cpu_percent.clamp(0.0, 100.0) / 100.0) * 20.0;
    let memory = (inputs.memory_percent.clamp(0.0, 100.0) / 100.0) * 20.0;
    let storage = inputs.storage_failure_ratio.clamp(0.0, 1.0) * 25.0;
    let raid = inputs.raid_degraded_ratio.clamp(0.0, 1.0) * 25.0;
    let latency = (inputs.p99_latency_ms.clamp(0.0, 1000.0) / 1000.0) * 10.0;
    (100.0 - cpu - memory - storage - raid - latency).max(0.0)
}

/// Compute the full report.
pub fn health_report(inputs: HealthInputs) -> HealthReport {
    let score = health_score(&inputs);
    let status = if score >= 80.0 {
        HealthStatus::Healthy
    } else if score >= 50.0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    };
    HealthReport {
        score,
        status,
        inputs,
    }
}
