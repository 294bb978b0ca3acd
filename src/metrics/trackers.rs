// Domain trackers over the registry.
//
// Callers say `track_request(...)` instead of naming the three metrics a
// request touches. All tracker methods are best-effort and non-suspending.

use std::sync::Arc;
use std::time::Instant;

use crate::metrics::registry::MetricsRegistry;

/// Registry wrapper owning the default metric set.
pub struct MetricsService {
    registry: Arc<MetricsRegistry>,
}

impl MetricsService {
    pub fn new(namespace: &str, subsystem: &str) -> Self {
        let registry = Arc::new(MetricsRegistry::new(namespace, subsystem));
        let service = Self { registry };
        service.initialize_default_metrics();
        service
    }

    pub fn registry(&self) -> Arc<MetricsRegistry> {
        self.registry.clone()
    }

    fn initialize_default_metrics(&self) {
        let r = &self.registry;
        r.create_counter(
            "http_requests_total",
            "Total HTTP requests",
            &["method", "endpoint", "status", "error_code"],
        );
        r.create_histogram(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            &["method", "endpoint"],
            None,
        );
        r.create_gauge(
            "http_in_progress",
            "HTTP requests currently in flight",
            &["endpoint"],
        );
        r.create_counter(
            "db_queries_total",
            "Total database queries",
            &["operation", "entity"],
        );
        r.create_histogram(
            "db_query_duration_seconds",
            "Database query duration in seconds",
            &["operation", "entity"],
            None,
        );
        r.create_counter(
            "service_calls_total",
            "Total service calls",
            &["component", "action", "success"],
        );
        r.create_histogram(
            "service_call_duration_seconds",
            "Service call duration in seconds",
            &["component", "action"],
            None,
        );
        r.create_counter(
            "cache_operations_total",
            "Total cache operations",
            &["operation", "backend", "hit", "component"],
        );
        r.create_histogram(
            "cache_operation_duration_seconds",
            "Cache operation duration in seconds",
            &["operation", "backend"],
            None,
        );
        r.create_counter(
            "ws_messages_total",
            "Total WebSocket frames handled",
            &["command", "success"],
        );
        r.create_gauge(
            "ws_connections_active",
            "Active WebSocket connections on this node",
            &[],
        );
        r.create_counter(
            "sync_runs_total",
            "Total sync pipeline runs",
            &["entity", "status"],
        );
        r.create_histogram(
            "sync_run_duration_seconds",
            "Sync pipeline run duration in seconds",
            &["entity"],
            Some(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        );
        r.create_counter(
            "token_validations_total",
            "Total token validations",
            &["success", "error_type"],
        );
        r.create_counter(
            "tokens_created_total",
            "Total tokens created",
            &["type", "role"],
        );
        r.create_histogram(
            "token_validation_duration_seconds",
            "Token validation duration in seconds",
            &["success"],
            None,
        );
        r.create_counter(
            "password_verifications_failed_total",
            "Failed password verifications",
            &["user_prefix"],
        );
        r.create_counter(
            "suspicious_content_total",
            "Suspicious content detections",
            &["component"],
        );
        r.create_counter(
            "event_handler_errors_total",
            "Event handler failures",
            &["event", "handler"],
        );
        r.create_histogram(
            "event_handler_duration_seconds",
            "Event handler duration in seconds",
            &["event", "handler"],
            None,
        );
        r.create_counter(
            "permission_checks_total",
            "Permission checks",
            &["granted", "cached"],
        );
    }

    pub fn track_request(
        &self,
        method: &str,
        endpoint: &str,
        status: u16,
        duration_secs: f64,
        error_code: Option<&str>,
    ) {
        let status = status.to_string();
        self.registry.increment_counter(
            "http_requests_total",
            1.0,
            &[
                ("method", method),
                ("endpoint", endpoint),
                ("status", &status),
                ("error_code", error_code.unwrap_or("none")),
            ],
        );
        self.registry.observe_histogram(
            "http_request_duration_seconds",
            duration_secs,
            &[("method", method), ("endpoint", endpoint)],
        );
    }

    pub fn track_db_query(&self, operation: &str, entity: &str, duration_secs: f64) {
        let labels = [("operation", operation), ("entity", entity)];
        self.registry.increment_counter("db_queries_total", 1.0, &labels);
        self.registry
            .observe_histogram("db_query_duration_seconds", duration_secs, &labels);
    }

    pub fn track_service_call(
        &self,
        component: &str,
        action: &str,
        success: bool,
        duration_secs: f64,
    ) {
        let success_label = if success { "true" } else { "false" };
        self.registry.increment_counter(
            "service_calls_total",
            1.0,
            &[
                ("component", component),
                ("action", action),
                ("success", success_label),
            ],
        );
        self.registry.observe_histogram(
            "service_call_duration_seconds",
            duration_secs,
            &[("component", component), ("action", action)],
        );
    }

    pub fn track_cache_operation(
        &self,
        operation: &str,
        backend: &str,
        hit: bool,
        duration_secs: f64,
        component: &str,
    ) {
        let hit_label = if hit { "hit" } else { "miss" };
        self.registry.increment_counter(
            "cache_operations_total",
            1.0,
            &[
                ("operation", operation),
                ("backend", backend),
                ("hit", hit_label),
                ("component", component),
            ],
        );
        self.registry.observe_histogram(
            "cache_operation_duration_seconds",
            duration_secs,
            &[("operation", operation), ("backend", backend)],
        );
    }

    /// Start a timer that observes the named histogram when dropped. When
    /// `in_progress_metric` is set the gauge is incremented now and
    /// decremented on drop, covering both normal and exceptional exit.
    pub fn start_timer(
        &self,
        metric: &str,
        labels: Vec<(String, String)>,
        in_progress_metric: Option<&str>,
    ) -> TimerGuard {
        if let Some(gauge) = in_progress_metric {
            let refs: Vec<(&str, &str)> = labels
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            self.registry.track_in_progress(gauge, &refs, 1);
        }
        TimerGuard {
            registry: self.registry.clone(),
            metric: metric.to_string(),
            labels,
            in_progress_metric: in_progress_metric.map(|s| s.to_string()),
            start: Instant::now(),
        }
    }
}

/// Observes the histogram and releases the in-progress gauge on drop.
pub struct TimerGuard {
    registry: Arc<MetricsRegistry>,
    metric: String,
    labels: Vec<(String, String)>,
    in_progress_metric: Option<String>,
    start: Instant,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        let refs: Vec<(&str, &str)> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.registry
            .observe_histogram(&self.metric, self.start.elapsed().as_secs_f64(), &refs);
        if let Some(gauge) = &self.in_progress_metric {
            self.registry.track_in_progress(gauge, &refs, -1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_request() {
        let service = MetricsService::new("t", "api");
        service.track_request("GET", "/chat/rooms", 200, 0.05, None);
        service.track_request("GET", "/chat/rooms", 200, 0.07, None);

        let count = service.registry().counter_value(
            "http_requests_total",
            &[
                ("method", "GET"),
                ("endpoint", "/chat/rooms"),
                ("status", "200"),
                ("error_code", "none"),
            ],
        );
        assert_eq!(count, Some(2.0));
    }

    #[test]
    fn test_track_cache_operation_hit_miss() {
        let service = MetricsService::new("t", "cache");
        service.track_cache_operation("get", "memory", true, 0.001, "chat");
        service.track_cache_operation("get", "memory", false, 0.001, "chat");

        let hits = service.registry().counter_value(
            "cache_operations_total",
            &[
                ("operation", "get"),
                ("backend", "memory"),
                ("hit", "hit"),
                ("component", "chat"),
            ],
        );
        assert_eq!(hits, Some(1.0));
    }

    #[test]
    fn test_timer_guard_releases_in_progress() {
        let service = MetricsService::new("t", "timer");
        service
            .registry()
            .create_histogram("work_seconds", "work", &[], None);
        service.registry().create_gauge("work_in_progress", "wip", &[]);

        {
            let _guard = service.start_timer("work_seconds", Vec::new(), Some("work_in_progress"));
            assert_eq!(
                service.registry().gauge_value("work_in_progress", &[]),
                Some(1.0)
            );
        }
        assert_eq!(
            service.registry().gauge_value("work_in_progress", &[]),
            Some(0.0)
        );
        assert_eq!(service.registry().histogram_count("work_seconds", &[]), Some(1));
    }
}
