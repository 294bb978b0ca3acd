// # Metrics Registry
//
// Four collector kinds (counter, gauge, histogram, summary) with ordered
// label lists, namespace/subsystem prefixes, and on-demand Prometheus text
// exposition. Metric recording is non-suspending; exposition renders a
// snapshot.
//
// Specialized trackers (HTTP, DB, service, cache) wrap the registry so
// callers update one domain call instead of naming three metrics.

pub mod exposition;
pub mod registry;
pub mod trackers;

pub use exposition::render;
pub use registry::{MetricKind, MetricsRegistry, DEFAULT_BUCKETS};
pub use trackers::{MetricsService, TimerGuard};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_buckets_are_sorted() {
        let mut sorted = DEFAULT_BUCKETS.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, DEFAULT_BUCKETS.to_vec());
    }
}
