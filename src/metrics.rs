//! In-process metrics: counters, gauges, and bounded timing samples.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Samples kept per timing series.
pub const MAX_TIMING_SAMPLES: usize = 1000;

#[derive(Debug)]
struct Inner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    timings: HashMap<String, VecDeque<Duration>>,
    started: Instant,
}

impl Inner {
    fn new() -> Self {
        Self {
            counters: HashMap::new(),
            gauges: HashMap::new(),
            timings: HashMap::new(),
            started: Instant::now(),
        }
    }
}

/// Aggregates over one timing series, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingStats {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
}

impl TimingStats {
    fn from_samples(samples: &VecDeque<Duration>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut secs: Vec<f64> = samples.iter().map(Duration::as_secs_f64).collect();
        secs.sort_by(f64::total_cmp);
        let count = secs.len();
        Some(Self {
            count,
            avg: secs.iter().sum::<f64>() / count as f64,
            min: secs[0],
            max: secs[count - 1],
            p95: percentile(&secs, 95),
            p99: percentile(&secs, 99),
        })
    }
}

/// Nearest-rank on sorted data: index `len * p / 100`, clamped.
fn percentile(sorted: &[f64], p: usize) -> f64 {
    let index = (sorted.len() * p / 100).min(sorted.len() - 1);
    sorted[index]
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub timings: BTreeMap<String, TimingStats>,
    pub uptime_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, value: u64) {
        *self.lock().counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.lock().gauges.insert(name.to_string(), value);
    }

    pub fn record_timing(&self, name: &str, duration: Duration) {
        let mut inner = self.lock();
        let samples = inner.timings.entry(name.to_string()).or_default();
        samples.push_back(duration);
        while samples.len() > MAX_TIMING_SAMPLES {
            samples.pop_front();
        }
    }

    /// Records the elapsed time under `name` when the guard drops.
    pub fn time(&self, name: &str) -> TimingGuard<'_> {
        TimingGuard {
            collector: self,
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        MetricsSnapshot {
            counters: inner.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            gauges: inner.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            timings: inner
                .timings
                .iter()
                .filter_map(|(k, v)| TimingStats::from_samples(v).map(|s| (k.clone(), s)))
                .collect(),
            uptime_seconds: inner.started.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    /// Plain-text rendering of [`snapshot`](Self::snapshot).
    pub fn summary(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::from("Metrics summary");

        if !snapshot.counters.is_empty() {
            out.push_str("\n\nCounters:");
            for (name, value) in &snapshot.counters {
                let _ = write!(out, "\n  {name}: {value}");
            }
        }
        if !snapshot.gauges.is_empty() {
            out.push_str("\n\nGauges:");
            for (name, value) in &snapshot.gauges {
                let _ = write!(out, "\n  {name}: {value:.2}");
            }
        }
        if !snapshot.timings.is_empty() {
            out.push_str("\n\nTimings (avg / p95):");
            for (name, stats) in &snapshot.timings {
                let _ = write!(out, "\n  {name}: {:.3}s / {:.3}s", stats.avg, stats.p95);
            }
        }
        let _ = write!(out, "\n\nUptime: {:.2} hours", snapshot.uptime_seconds / 3600.0);
        out
    }

    pub fn reset(&self) {
        *self.lock() = Inner::new();
        tracing::info!("Metrics reset");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TimingGuard<'a> {
    collector: &'a MetricsCollector,
    name: String,
    started: Instant,
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        self.collector
            .record_timing(&self.name, self.started.elapsed());
    }
}
