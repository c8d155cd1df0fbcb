//! Metrics registry
//!
//! Counters, gauges and histograms keyed by `name{sorted_labels}`.
//! Histograms retain a bounded ring of the most recent 1000 samples for
//! percentile estimation; overflow drops the oldest sample, which is the
//! one place in the system where overflow sheds data.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Samples retained per histogram.
pub const HISTOGRAM_WINDOW: usize = 1000;

/// Build the registry key: `name{k1=v1,k2=v2}` with labels sorted by key.
pub fn metric_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<(&str, &str)> = labels.to_vec();
    sorted.sort();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

#[derive(Debug, Default)]
struct HistogramRing {
    samples: VecDeque<f64>,
    total_count: u64,
}

impl HistogramRing {
    fn observe(&mut self, value: f64) {
        if self.samples.len() == HISTOGRAM_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.total_count += 1;
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("no NaN samples"));
        let percentile = |q: f64| -> f64 {
            if sorted.is_empty() {
                return 0.0;
            }
            let rank = (q * sorted.len() as f64).ceil() as usize;
            sorted[rank.clamp(1, sorted.len()) - 1]
        };
        let sum: f64 = sorted.iter().sum();
        HistogramSnapshot {
            count: self.total_count,
            window: sorted.len(),
            mean: if sorted.is_empty() { 0.0 } else { sum / sorted.len() as f64 },
            min: sorted.first().copied().unwrap_or(0.0),
            max: sorted.last().copied().unwrap_or(0.0),
            p50: percentile(0.50),
            p75: percentile(0.75),
            p90: percentile(0.90),
            p95: percentile(0.95),
            p99: percentile(0.99),
        }
    }
}

/// Percentile summary of one histogram.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HistogramSnapshot {
    /// Samples observed since creation
    pub count: u64,
    /// Samples currently in the ring
    pub window: usize,
    /// Mean of the window
    pub mean: f64,
    /// Minimum of the window
    pub min: f64,
    /// Maximum of the window
    pub max: f64,
    /// 50th percentile
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
}

/// Structured dump of the whole registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Counter values by key
    pub counters: BTreeMap<String, u64>,
    /// Gauge values by key
    pub gauges: BTreeMap<String, f64>,
    /// Histogram summaries by key
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

/// Concurrent metrics registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, AtomicU64>,
    gauges: DashMap<String, AtomicU64>, // f64 bits
    histograms: DashMap<String, Mutex<HistogramRing>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)], by: u64) {
        let key = metric_key(name, labels);
        self.counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(by, Ordering::Relaxed);
    }

    /// Set a gauge.
    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = metric_key(name, labels);
        self.gauges
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .store(value.to_bits(), Ordering::Relaxed);
    }

    /// Record a histogram sample.
    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = metric_key(name, labels);
        self.histograms
            .entry(key)
            .or_insert_with(|| Mutex::new(HistogramRing::default()))
            .lock()
            .observe(value);
    }

    /// Current value of a counter, zero when absent.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&metric_key(name, labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Summary of one histogram.
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSnapshot> {
        self.histograms
            .get(&metric_key(name, labels))
            .map(|h| h.lock().snapshot())
    }

    /// Structured snapshot of everything.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snap = MetricsSnapshot::default();
        for entry in self.counters.iter() {
            snap.counters
                .insert(entry.key().clone(), entry.value().load(Ordering::Relaxed));
        }
        for entry in self.gauges.iter() {
            snap.gauges.insert(
                entry.key().clone(),
                f64::from_bits(entry.value().load(Ordering::Relaxed)),
            );
        }
        for entry in self.histograms.iter() {
            snap.histograms
                .insert(entry.key().clone(), entry.value().lock().snapshot());
        }
        snap
    }

    /// Prometheus text exposition of the registry.
    pub fn prometheus_text(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();
        for (key, value) in &snap.counters {
            out.push_str(&format!("{key} {value}\n"));
        }
        for (key, value) in &snap.gauges {
            out.push_str(&format!("{key} {value}\n"));
        }
        for (key, hist) in &snap.histograms {
            let (name, labels) = split_key(key);
            for (q, v) in [
                ("0.5", hist.p50),
                ("0.75", hist.p75),
                ("0.9", hist.p90),
                ("0.95", hist.p95),
                ("0.99", hist.p99),
            ] {
                let sep = if labels.is_empty() { "" } else { "," };
                out.push_str(&format!("{name}{{{labels}{sep}quantile=\"{q}\"}} {v}\n"));
            }
            out.push_str(&format!("{name}_count{{{labels}}} {}\n", hist.count));
        }
        out
    }
}

fn split_key(key: &str) -> (&str, &str) {
    match key.split_once('{') {
        Some((name, rest)) => (name, rest.trim_end_matches('}')),
        None => (key, ""),
    }
}
