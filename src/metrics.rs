//! Latency histograms for the translation path, served at `/api/metrics`.
//! Each metric keeps its most recent samples, in microseconds.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Samples retained per metric.
pub const WINDOW: usize = 1024;

/// Records the time from creation to [`TimingSpan::finish`].
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record the elapsed time and return it in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
}

impl MetricSummary {
    /// Nearest-rank percentiles over one sorted copy of the window.
    fn of(window: &VecDeque<f64>) -> Self {
        let mut sorted: Vec<f64> = window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = |p: f64| {
            let idx = (p / 100.0 * sorted.len() as f64).ceil() as usize;
            sorted.get(idx.saturating_sub(1)).copied().unwrap_or(0.0)
        };
        Self {
            count: sorted.len(),
            p50_us: rank(50.0),
            p95_us: rank(95.0),
            p99_us: rank(99.0),
            max_us: sorted.last().copied().unwrap_or(0.0),
        }
    }
}

#[derive(Default)]
pub struct MetricsRegistry {
    windows: Mutex<HashMap<&'static str, VecDeque<f64>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut windows = self.windows.lock();
        let window = windows
            .entry(name)
            .or_insert_with(|| VecDeque::with_capacity(WINDOW));
        if window.len() == WINDOW {
            window.pop_front();
        }
        window.push_back(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    /// Per-metric summaries, ordered by name.
    pub fn summary(&self) -> BTreeMap<&'static str, MetricSummary> {
        self.windows
            .lock()
            .iter()
            .map(|(&name, window)| (name, MetricSummary::of(window)))
            .collect()
    }
}

/// Metric names recorded by the pipeline, the cache front and the prefetcher.
pub mod metric_names {
    pub const FETCH_DONE: &str = "t_fetch_done";
    pub const PROMPT_RESOLVED: &str = "t_prompt_resolved";
    pub const INVOKE_SETUP: &str = "t_invoke_setup";
    pub const FIRST_CHUNK: &str = "t_first_chunk";
    pub const GENERATION_DONE: &str = "t_generation_done";
    /// Time until the cache handed back a handle (hit, wait or production).
    pub const TRANSLATE_RESOLVED: &str = "t_translate_resolved";
    pub const QUEUE_WAIT_PREFETCH: &str = "queue_wait_prefetch";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_rank_percentiles() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry.record(metric_names::FETCH_DONE, v as f64);
        }
        let summary = registry.summary()[metric_names::FETCH_DONE];
        assert_eq!(summary.count, 100);
        assert_eq!(summary.p50_us, 50.0);
        assert_eq!(summary.p95_us, 95.0);
        assert_eq!(summary.p99_us, 99.0);
        assert_eq!(summary.max_us, 100.0);
    }

    #[test]
    fn window_drops_oldest_samples() {
        let registry = MetricsRegistry::new();
        registry.record(metric_names::FIRST_CHUNK, 1_000_000.0);
        for _ in 0..WINDOW {
            registry.record(metric_names::FIRST_CHUNK, 5.0);
        }
        let summary = registry.summary()[metric_names::FIRST_CHUNK];
        assert_eq!(summary.count, WINDOW);
        assert_eq!(summary.max_us, 5.0);
    }

    #[test]
    fn span_records_on_finish() {
        let registry = Arc::new(MetricsRegistry::new());
        let elapsed = registry.span(metric_names::INVOKE_SETUP).finish();
        assert!(elapsed >= 0.0);
        assert_eq!(registry.summary()[metric_names::INVOKE_SETUP].count, 1);
        assert!(registry.summary().get(metric_names::FETCH_DONE).is_none());
    }
}
