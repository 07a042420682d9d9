//! In-process metrics for the realtime and adaptive loops.
//!
//! Every series lives in one registry keyed by its rendered id
//! (`name{label=value,...}` with labels sorted), so a series is created on
//! first write and read back by the same name and labels.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Observations kept by a histogram with no configured capacity.
pub const DEFAULT_HISTOGRAM_CAPACITY: usize = 1024;

/// Summary of the observations currently held by a histogram window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Ring of the most recent observations.
#[derive(Debug)]
struct Window {
    cap: usize,
    values: VecDeque<f64>,
}

impl Window {
    fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            values: VecDeque::with_capacity(cap),
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() == self.cap {
            let _ = self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn summary(&self) -> HistogramSummary {
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        if sorted.is_empty() {
            return HistogramSummary::default();
        }
        sorted.sort_by(f64::total_cmp);
        HistogramSummary {
            count: sorted.len() as u64,
            sum: sorted.iter().sum(),
            p50: nearest_rank(&sorted, 0.50),
            p95: nearest_rank(&sorted, 0.95),
            p99: nearest_rank(&sorted, 0.99),
        }
    }
}

/// Nearest-rank quantile of a non-empty sorted slice.
fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug)]
enum Series {
    Counter(u64),
    Gauge(f64),
    Histogram(Window),
}

impl Series {
    fn kind(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Gauge(_) => "gauge",
            Self::Histogram(_) => "histogram",
        }
    }
}

fn series_id(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted = labels.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

/// Counters, gauges and bounded histograms behind one lock.
///
/// Writing a series under a name already held by a different metric kind
/// is ignored.
#[derive(Default)]
pub struct MetricsRecorder {
    series: Mutex<BTreeMap<String, Series>>,
    /// Histogram window sizes by metric name.
    capacities: HashMap<String, usize>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `cap` observations for every histogram series named `name`.
    pub fn with_histogram_capacity(mut self, name: &str, cap: usize) -> Self {
        let _ = self.capacities.insert(name.to_string(), cap);
        self
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let mut series = self.series.lock();
        match series
            .entry(series_id(name, labels))
            .or_insert(Series::Counter(0))
        {
            Series::Counter(value) => *value = value.saturating_add(n),
            other => debug!(metric = name, kind = other.kind(), "counter write to non-counter series"),
        }
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let mut series = self.series.lock();
        match series
            .entry(series_id(name, labels))
            .or_insert(Series::Gauge(value))
        {
            Series::Gauge(current) => *current = value,
            other => debug!(metric = name, kind = other.kind(), "gauge write to non-gauge series"),
        }
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let cap = self
            .capacities
            .get(name)
            .copied()
            .unwrap_or(DEFAULT_HISTOGRAM_CAPACITY);
        let mut series = self.series.lock();
        match series
            .entry(series_id(name, labels))
            .or_insert_with(|| Series::Histogram(Window::new(cap)))
        {
            Series::Histogram(window) => window.push(value),
            other => debug!(metric = name, kind = other.kind(), "histogram write to non-histogram series"),
        }
    }

    /// Zeroed summary for a series that was never observed.
    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        match self.series.lock().get(&series_id(name, labels)) {
            Some(Series::Histogram(window)) => window.summary(),
            _ => HistogramSummary::default(),
        }
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        match self.series.lock().get(&series_id(name, labels)) {
            Some(Series::Counter(value)) => *value,
            _ => 0,
        }
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        match self.series.lock().get(&series_id(name, labels)) {
            Some(Series::Gauge(value)) => *value,
            _ => 0.0,
        }
    }
}
