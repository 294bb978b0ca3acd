// # Event Bus
//
// In-process publish/subscribe with typed handlers and error isolation. A
// handler exception is logged, counted, and optionally forwarded to the error
// reporter, but never propagates to other subscribers or to the publisher.
//
// The in-process backend dispatches on the publishing task and is
// deterministic within a single process. A distributed backend can be
// attached; its contract is at-least-once delivery with no cross-shard
// ordering, and `publish` returns once the message is durably enqueued.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;

use crate::error::Result;
use crate::metrics::MetricsService;

/// One published event as seen by handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// Payload, always placed under `data`.
    pub data: Value,
    /// Merged context: process defaults, then per-call context.
    pub context: Map<String, Value>,
    pub timestamp: String,
}

type HandlerFuture = BoxFuture<'static, Result<()>>;
type HandlerFn = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;
type FilterFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct Subscription {
    handler_name: String,
    handler: HandlerFn,
    filter: Option<FilterFn>,
}

/// Backend for cross-process fan-out. Delivery is at-least-once; ordering is
/// not guaranteed across shards.
#[async_trait]
pub trait DistributedEventBackend: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<()>;
}

pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    default_context: RwLock<Map<String, Value>>,
    distributed: RwLock<Option<Arc<dyn DistributedEventBackend>>>,
    metrics: RwLock<Option<Arc<MetricsService>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            default_context: RwLock::new(Map::new()),
            distributed: RwLock::new(None),
            metrics: RwLock::new(None),
        }
    }

    pub fn set_metrics(&self, metrics: Arc<MetricsService>) {
        *self.metrics.write() = Some(metrics);
    }

    pub fn set_distributed_backend(&self, backend: Arc<dyn DistributedEventBackend>) {
        *self.distributed.write() = Some(backend);
    }

    /// Merge key/value pairs into the process-wide default context.
    pub fn set_default_context(&self, context: Map<String, Value>) {
        self.default_context.write().extend(context);
    }

    pub fn subscribe<F, Fut>(&self, event_name: &str, handler_name: &str, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe_inner(event_name, handler_name, handler, None);
    }

    /// Subscribe with a filter predicate; the handler only runs for events
    /// the predicate accepts.
    pub fn subscribe_filtered<F, Fut, P>(
        &self,
        event_name: &str,
        handler_name: &str,
        filter: P,
        handler: F,
    ) where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.subscribe_inner(event_name, handler_name, handler, Some(Arc::new(filter)));
    }

    fn subscribe_inner<F, Fut>(
        &self,
        event_name: &str,
        handler_name: &str,
        handler: F,
        filter: Option<FilterFn>,
    ) where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |event| Box::pin(handler(event)));
        self.subscriptions
            .write()
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription {
                handler_name: handler_name.to_string(),
                handler,
                filter,
            });
        tracing::debug!(event = event_name, handler = handler_name, "event handler registered");
    }

    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.subscriptions
            .read()
            .get(event_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Publish an event: merge contexts, stamp a timestamp if absent, and
    /// dispatch to every subscriber with error isolation.
    pub async fn publish(&self, name: &str, payload: Value, context: Option<Map<String, Value>>) {
        let mut merged = self.default_context.read().clone();
        if let Some(context) = context {
            merged.extend(context);
        }
        let event = Event {
            name: name.to_string(),
            data: payload,
            context: merged,
            timestamp: Utc::now().to_rfc3339(),
        };

        let handlers: Vec<(String, HandlerFn, Option<FilterFn>)> = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .get(name)
                .map(|subs| {
                    subs.iter()
                        .map(|s| (s.handler_name.clone(), s.handler.clone(), s.filter.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (handler_name, handler, filter) in handlers {
            if let Some(filter) = &filter {
                if !filter(&event) {
                    continue;
                }
            }
            let started = Instant::now();
            let outcome = handler(event.clone()).await;
            let elapsed = started.elapsed().as_secs_f64();
            if let Some(metrics) = self.metrics.read().clone() {
                metrics.registry().observe_histogram(
                    "event_handler_duration_seconds",
                    elapsed,
                    &[("event", name), ("handler", &handler_name)],
                );
            }
            if let Err(err) = outcome {
                tracing::error!(
                    event = name,
                    handler = %handler_name,
                    error = %err,
                    "event handler failed"
                );
                if let Some(metrics) = self.metrics.read().clone() {
                    metrics.registry().increment_counter(
                        "event_handler_errors_total",
                        1.0,
                        &[("event", name), ("handler", &handler_name)],
                    );
                }
            }
        }

        // Cross-process fan-out is best-effort.
        let distributed = self.distributed.read().clone();
        if let Some(backend) = distributed {
            if let Err(err) = backend.publish(&event).await {
                tracing::warn!(event = name, error = %err, "distributed event publish failed");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        bus.subscribe("user.created", "count", move |event| {
            let hits = hits_clone.clone();
            async move {
                assert_eq!(event.data["id"], "u1");
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish("user.created", json!({"id": "u1"}), None).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        bus.subscribe("e", "fails", |_| async {
            Err(crate::error::AppError::Internal("boom".into()))
        });
        bus.subscribe("e", "succeeds", move |_| {
            let hits = hits_clone.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish("e", json!({}), None).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filter_predicate() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        bus.subscribe_filtered(
            "e",
            "filtered",
            |event| event.data["level"] == "error",
            move |_| {
                let hits = hits_clone.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        bus.publish("e", json!({"level": "info"}), None).await;
        bus.publish("e", json!({"level": "error"}), None).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_context_merging() {
        let bus = EventBus::new();
        let mut defaults = Map::new();
        defaults.insert("service".to_string(), json!("partgrid"));
        bus.set_default_context(defaults);

        let seen = Arc::new(RwLock::new(None));
        let seen_clone = seen.clone();
        bus.subscribe("e", "ctx", move |event| {
            let seen = seen_clone.clone();
            async move {
                *seen.write() = Some(event.context.clone());
                Ok(())
            }
        });

        let mut call_ctx = Map::new();
        call_ctx.insert("request_id".to_string(), json!("r1"));
        bus.publish("e", json!({}), Some(call_ctx)).await;

        let context = seen.read().clone().unwrap();
        assert_eq!(context["service"], "partgrid");
        assert_eq!(context["request_id"], "r1");
    }
}
