//! Metrics - process-local counters, gauges, and histograms
//!
//! A scrape-friendly registry: collaborators record name-keyed values and
//! `export()` renders them in Prometheus text format. Histograms use the
//! fixed latency bucket ladder; a [`Timer`] observes its scope's elapsed
//! seconds on drop.

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Instant;

use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
struct Histogram {
    /// (upper_bound, count) per bucket; the +Inf bucket is implicit in
    /// `count`.
    buckets: Vec<(f64, u64)>,
    count: u64,
    sum: f64,
}

#[derive(Debug, Default)]
struct Inner {
    counters: FxHashMap<String, f64>,
    gauges: FxHashMap<String, f64>,
    histograms: FxHashMap<String, Histogram>,
}

/// Shared metrics registry. Cheap enough to lock per observation; nothing
/// here sits on the ledger's hot path.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("metrics registry poisoned")
    }

    pub fn increment_counter(&self, name: &str, value: f64) {
        *self.lock().counters.entry(name.to_string()).or_default() += value;
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.lock().gauges.insert(name.to_string(), value);
    }

    pub fn increment_gauge(&self, name: &str, value: f64) {
        *self.lock().gauges.entry(name.to_string()).or_default() += value;
    }

    pub fn decrement_gauge(&self, name: &str, value: f64) {
        self.increment_gauge(name, -value);
    }

    pub fn observe_histogram(&self, name: &str, value: f64) {
        let mut inner = self.lock();
        let histogram = inner.histograms.entry(name.to_string()).or_default();
        if histogram.buckets.is_empty() {
            histogram.buckets = default_buckets().iter().map(|&b| (b, 0)).collect();
        }
        histogram.count += 1;
        histogram.sum += value;
        for bucket in &mut histogram.buckets {
            if value <= bucket.0 {
                bucket.1 += 1;
            }
        }
    }

    pub fn counter(&self, name: &str) -> f64 {
        self.lock().counters.get(name).copied().unwrap_or(0.0)
    }

    pub fn gauge(&self, name: &str) -> f64 {
        self.lock().gauges.get(name).copied().unwrap_or(0.0)
    }

    /// Render everything in Prometheus text exposition format.
    pub fn export(&self) -> String {
        let inner = self.lock();
        let mut out = String::new();

        let mut counters: Vec<_> = inner.counters.iter().collect();
        counters.sort_by_key(|(name, _)| name.as_str());
        for (name, value) in counters {
            let _ = writeln!(out, "# HELP {name} Counter metric");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }

        let mut gauges: Vec<_> = inner.gauges.iter().collect();
        gauges.sort_by_key(|(name, _)| name.as_str());
        for (name, value) in gauges {
            let _ = writeln!(out, "# HELP {name} Gauge metric");
            let _ = writeln!(out, "# TYPE {name} gauge");
            let _ = writeln!(out, "{name} {value}");
        }

        let mut histograms: Vec<_> = inner.histograms.iter().collect();
        histograms.sort_by_key(|(name, _)| name.as_str());
        for (name, histogram) in histograms {
            let _ = writeln!(out, "# HELP {name} Histogram metric");
            let _ = writeln!(out, "# TYPE {name} histogram");
            for (bound, count) in &histogram.buckets {
                let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {count}");
            }
            let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", histogram.count);
            let _ = writeln!(out, "{name}_count {}", histogram.count);
            let _ = writeln!(out, "{name}_sum {}", histogram.sum);
        }
        out
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.counters.clear();
        inner.gauges.clear();
        inner.histograms.clear();
    }
}

fn default_buckets() -> &'static [f64] {
    &[
        0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
    ]
}

/// Observes elapsed wall time into a histogram when dropped.
pub struct Timer<'a> {
    registry: &'a MetricsRegistry,
    name: String,
    start: Instant,
}

impl<'a> Timer<'a> {
    pub fn new(registry: &'a MetricsRegistry, name: &str) -> Self {
        Self {
            registry,
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.registry
            .observe_histogram(&self.name, self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_gauges() {
        let metrics = MetricsRegistry::new();
        metrics.increment_counter("requests_total", 1.0);
        metrics.increment_counter("requests_total", 2.0);
        metrics.set_gauge("connections", 3.0);
        metrics.decrement_gauge("connections", 1.0);

        assert_eq!(metrics.counter("requests_total"), 3.0);
        assert_eq!(metrics.gauge("connections"), 2.0);
    }

    #[test]
    fn test_histogram_buckets_cumulative() {
        let metrics = MetricsRegistry::new();
        metrics.observe_histogram("latency_seconds", 0.004);
        metrics.observe_histogram("latency_seconds", 0.3);
        metrics.observe_histogram("latency_seconds", 42.0);

        let text = metrics.export();
        assert!(text.contains("latency_seconds_bucket{le=\"0.005\"} 1"));
        assert!(text.contains("latency_seconds_bucket{le=\"0.5\"} 2"));
        assert!(text.contains("latency_seconds_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("latency_seconds_count 3"));
    }

    #[test]
    fn test_timer_observes_on_drop() {
        let metrics = MetricsRegistry::new();
        {
            let _t = Timer::new(&metrics, "scope_seconds");
        }
        assert!(metrics.export().contains("scope_seconds_count 1"));
    }

    #[test]
    fn test_export_format() {
        let metrics = MetricsRegistry::new();
        metrics.increment_counter("ops_total", 5.0);
        let text = metrics.export();
        assert!(text.contains("# TYPE ops_total counter"));
        assert!(text.contains("ops_total 5"));
    }
}
