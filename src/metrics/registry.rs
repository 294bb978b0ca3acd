// Metric collectors and the process-wide registry.
//
// Writes take per-family fine-grained locks; label vectors are immutable once
// a series is created. Mutating an unregistered metric is a logged no-op so a
// missing collector can never take down a request path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Default histogram buckets in seconds.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

#[derive(Debug, Clone)]
pub(crate) enum Series {
    Value(f64),
    Histogram {
        bucket_counts: Vec<u64>,
        sum: f64,
        count: u64,
    },
    Summary {
        sum: f64,
        count: u64,
    },
}

pub struct MetricFamily {
    pub(crate) name: String,
    pub(crate) help: String,
    pub(crate) kind: MetricKind,
    pub(crate) label_names: Vec<String>,
    pub(crate) buckets: Vec<f64>,
    pub(crate) series: RwLock<HashMap<Vec<String>, Series>>,
}

impl MetricFamily {
    /// Order the supplied label pairs by this family's label-name list.
    /// Missing labels become empty strings; unknown labels are dropped.
    fn label_values(&self, labels: &[(&str, &str)]) -> Vec<String> {
        self.label_names
            .iter()
            .map(|name| {
                labels
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| (*value).to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// Process-wide metrics registry.
pub struct MetricsRegistry {
    namespace: String,
    subsystem: String,
    families: RwLock<HashMap<String, Arc<MetricFamily>>>,
    /// `(metric, label values)` -> current in-progress count; keeps the gauge
    /// from going negative under racing decrements.
    in_progress: Mutex<HashMap<(String, Vec<String>), i64>>,
}

impl MetricsRegistry {
    pub fn new(namespace: impl Into<String>, subsystem: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subsystem: subsystem.into(),
            families: RwLock::new(HashMap::new()),
            in_progress: Mutex::new(HashMap::new()),
        }
    }

    fn full_name(&self, name: &str) -> String {
        let mut full = String::new();
        if !self.namespace.is_empty() {
            full.push_str(&self.namespace);
            full.push('_');
        }
        if !self.subsystem.is_empty() {
            full.push_str(&self.subsystem);
            full.push('_');
        }
        full.push_str(name);
        full
    }

    fn register(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
        buckets: Vec<f64>,
    ) {
        let family = Arc::new(MetricFamily {
            name: self.full_name(name),
            help: help.to_string(),
            kind,
            label_names: label_names.iter().map(|s| s.to_string()).collect(),
            buckets,
            series: RwLock::new(HashMap::new()),
        });
        // Re-registration replaces the prior collector.
        self.families.write().insert(name.to_string(), family);
    }

    pub fn create_counter(&self, name: &str, help: &str, label_names: &[&str]) {
        self.register(name, help, MetricKind::Counter, label_names, Vec::new());
    }

    pub fn create_gauge(&self, name: &str, help: &str, label_names: &[&str]) {
        self.register(name, help, MetricKind::Gauge, label_names, Vec::new());
    }

    pub fn create_histogram(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: Option<Vec<f64>>,
    ) {
        let mut buckets = buckets.unwrap_or_else(|| DEFAULT_BUCKETS.to_vec());
        buckets.sort_by(|a, b| a.partial_cmp(b).unwrap());
        self.register(name, help, MetricKind::Histogram, label_names, buckets);
    }

    pub fn create_summary(&self, name: &str, help: &str, label_names: &[&str]) {
        self.register(name, help, MetricKind::Summary, label_names, Vec::new());
    }

    fn family(&self, name: &str, kind: MetricKind) -> Option<Arc<MetricFamily>> {
        let family = self.families.read().get(name).cloned();
        match family {
            Some(f) if f.kind == kind => Some(f),
            Some(f) => {
                tracing::warn!(metric = name, expected = ?kind, actual = ?f.kind, "metric kind mismatch");
                None
            }
            None => {
                tracing::warn!(metric = name, "metric not registered");
                None
            }
        }
    }

    pub fn increment_counter(&self, name: &str, amount: f64, labels: &[(&str, &str)]) {
        if amount < 0.0 {
            return;
        }
        if let Some(family) = self.family(name, MetricKind::Counter) {
            let values = family.label_values(labels);
            let mut series = family.series.write();
            match series.entry(values).or_insert(Series::Value(0.0)) {
                Series::Value(v) => *v += amount,
                _ => {}
            }
        }
    }

    pub fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Some(family) = self.family(name, MetricKind::Gauge) {
            let values = family.label_values(labels);
            family.series.write().insert(values, Series::Value(value));
        }
    }

    pub fn observe_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Some(family) = self.family(name, MetricKind::Histogram) {
            let values = family.label_values(labels);
            let bucket_len = family.buckets.len();
            let mut series = family.series.write();
            let entry = series.entry(values).or_insert_with(|| Series::Histogram {
                bucket_counts: vec![0; bucket_len],
                sum: 0.0,
                count: 0,
            });
            if let Series::Histogram {
                bucket_counts,
                sum,
                count,
            } = entry
            {
                for (i, upper) in family.buckets.iter().enumerate() {
                    if value <= *upper {
                        bucket_counts[i] += 1;
                    }
                }
                *sum += value;
                *count += 1;
            }
        }
    }

    pub fn observe_summary(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Some(family) = self.family(name, MetricKind::Summary) {
            let values = family.label_values(labels);
            let mut series = family.series.write();
            let entry = series
                .entry(values)
                .or_insert(Series::Summary { sum: 0.0, count: 0 });
            if let Series::Summary { sum, count } = entry {
                *sum += value;
                *count += 1;
            }
        }
    }

    /// Adjust an in-progress gauge by `delta`, clamping the tracked count at
    /// zero so the gauge can never go negative.
    pub fn track_in_progress(&self, name: &str, labels: &[(&str, &str)], delta: i64) {
        let Some(family) = self.family(name, MetricKind::Gauge) else {
            return;
        };
        let values = family.label_values(labels);
        let mut tracker = self.in_progress.lock();
        let entry = tracker.entry((name.to_string(), values.clone())).or_insert(0);
        *entry = (*entry + delta).max(0);
        let current = *entry as f64;
        drop(tracker);
        family.series.write().insert(values, Series::Value(current));
    }

    // Snapshot accessors, used by exposition and tests.

    pub(crate) fn families_snapshot(&self) -> Vec<Arc<MetricFamily>> {
        let mut families: Vec<_> = self.families.read().values().cloned().collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));
        families
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.scalar_value(name, labels, MetricKind::Counter)
    }

    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.scalar_value(name, labels, MetricKind::Gauge)
    }

    fn scalar_value(&self, name: &str, labels: &[(&str, &str)], kind: MetricKind) -> Option<f64> {
        let family = self.families.read().get(name).cloned()?;
        if family.kind != kind {
            return None;
        }
        let values = family.label_values(labels);
        let result = match family.series.read().get(&values) {
            Some(Series::Value(v)) => Some(*v),
            _ => None,
        };
        result
    }

    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        let family = self.families.read().get(name).cloned()?;
        let values = family.label_values(labels);
        let result = match family.series.read().get(&values) {
            Some(Series::Histogram { count, .. }) => Some(*count),
            _ => None,
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new("partgrid", "test")
    }

    #[test]
    fn test_counter_increments() {
        let reg = registry();
        reg.create_counter("requests_total", "Total requests", &["method"]);

        reg.increment_counter("requests_total", 1.0, &[("method", "GET")]);
        reg.increment_counter("requests_total", 2.0, &[("method", "GET")]);
        reg.increment_counter("requests_total", 1.0, &[("method", "POST")]);

        assert_eq!(
            reg.counter_value("requests_total", &[("method", "GET")]),
            Some(3.0)
        );
        assert_eq!(
            reg.counter_value("requests_total", &[("method", "POST")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_counter_rejects_negative() {
        let reg = registry();
        reg.create_counter("c", "c", &[]);
        reg.increment_counter("c", 5.0, &[]);
        reg.increment_counter("c", -3.0, &[]);
        assert_eq!(reg.counter_value("c", &[]), Some(5.0));
    }

    #[test]
    fn test_unregistered_metric_is_noop() {
        let reg = registry();
        reg.increment_counter("nope", 1.0, &[]);
        assert_eq!(reg.counter_value("nope", &[]), None);
    }

    #[test]
    fn test_gauge_set() {
        let reg = registry();
        reg.create_gauge("g", "g", &["pool"]);
        reg.set_gauge("g", 12.5, &[("pool", "a")]);
        reg.set_gauge("g", 3.0, &[("pool", "a")]);
        assert_eq!(reg.gauge_value("g", &[("pool", "a")]), Some(3.0));
    }

    #[test]
    fn test_histogram_buckets() {
        let reg = registry();
        reg.create_histogram("h", "h", &[], Some(vec![0.1, 1.0]));
        reg.observe_histogram("h", 0.05, &[]);
        reg.observe_histogram("h", 0.5, &[]);
        reg.observe_histogram("h", 5.0, &[]);
        assert_eq!(reg.histogram_count("h", &[]), Some(3));
    }

    #[test]
    fn test_in_progress_never_negative() {
        let reg = registry();
        reg.create_gauge("in_progress", "work in progress", &["kind"]);

        reg.track_in_progress("in_progress", &[("kind", "sync")], 1);
        reg.track_in_progress("in_progress", &[("kind", "sync")], -1);
        reg.track_in_progress("in_progress", &[("kind", "sync")], -1);

        assert_eq!(
            reg.gauge_value("in_progress", &[("kind", "sync")]),
            Some(0.0)
        );
    }

    #[test]
    fn test_missing_label_defaults_empty() {
        let reg = registry();
        reg.create_counter("c", "c", &["a", "b"]);
        reg.increment_counter("c", 1.0, &[("a", "x")]);
        assert_eq!(reg.counter_value("c", &[("a", "x"), ("b", "")]), Some(1.0));
    }
}
