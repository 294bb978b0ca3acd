// Cache manager.
//
// Named backends behind one API, tag-based invalidation, and keyed
// get-or-compute helpers. Metrics are best-effort: a missing metrics service
// never fails a cache path.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::backend::CacheBackend;
use crate::error::{AppError, Result};
use crate::metrics::MetricsService;

/// Prefix for tag membership sets.
pub const TAG_KEY_PREFIX: &str = "cache:tag:";

pub struct CacheManager {
    backends: RwLock<HashMap<String, Arc<dyn CacheBackend>>>,
    default_backend: RwLock<String>,
    metrics: RwLock<Option<Arc<MetricsService>>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
            default_backend: RwLock::new(String::new()),
            metrics: RwLock::new(None),
        }
    }

    /// Attach the metrics service once it is constructed. Late binding keeps
    /// the cache usable from inside the metrics service's own construction.
    pub fn set_metrics(&self, metrics: Arc<MetricsService>) {
        *self.metrics.write() = Some(metrics);
    }

    pub fn register_backend(&self, name: &str, backend: Arc<dyn CacheBackend>) {
        let mut backends = self.backends.write();
        let first = backends.is_empty();
        backends.insert(name.to_string(), backend);
        if first {
            *self.default_backend.write() = name.to_string();
        }
    }

    pub fn set_default_backend(&self, name: &str) -> Result<()> {
        if !self.backends.read().contains_key(name) {
            return Err(AppError::Configuration(format!(
                "cache backend not registered: {}",
                name
            )));
        }
        *self.default_backend.write() = name.to_string();
        Ok(())
    }

    pub fn backend(&self, name: Option<&str>) -> Result<Arc<dyn CacheBackend>> {
        let backends = self.backends.read();
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_backend.read().clone(),
        };
        backends.get(&name).cloned().ok_or_else(|| {
            AppError::Configuration(format!("cache backend not registered: {}", name))
        })
    }

    fn record(&self, operation: &str, backend: &str, hit: bool, started: Instant, component: &str) {
        if let Some(metrics) = self.metrics.read().clone() {
            metrics.track_cache_operation(
                operation,
                backend,
                hit,
                started.elapsed().as_secs_f64(),
                component,
            );
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let backend = self.backend(None)?;
        let started = Instant::now();
        let value = backend.get(key).await?;
        self.record("get", backend.backend_name(), value.is_some(), started, "cache");
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let backend = self.backend(None)?;
        let started = Instant::now();
        backend.set(key, value, ttl).await?;
        self.record("set", backend.backend_name(), true, started, "cache");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let backend = self.backend(None)?;
        backend.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let backend = self.backend(None)?;
        backend.exists(key).await
    }

    pub async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let backend = self.backend(None)?;
        backend.increment(key, delta, ttl).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }

    /// Delete every key matching the glob pattern on the chosen backend.
    pub async fn invalidate_pattern(&self, pattern: &str, backend: Option<&str>) -> Result<u64> {
        let backend = self.backend(backend)?;
        let keys = backend.keys_matching(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = backend.delete_many(&keys).await?;
        tracing::debug!(pattern, removed, "cache pattern invalidated");
        Ok(removed)
    }

    /// Bounded form of pattern invalidation.
    pub async fn clear_prefix(&self, prefix: &str) -> Result<u64> {
        self.invalidate_pattern(&format!("{}*", prefix), None).await
    }

    /// Store a value and record its key under each tag set, when the backend
    /// supports sets.
    pub async fn set_with_tags(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        tags: &[&str],
    ) -> Result<()> {
        let backend = self.backend(None)?;
        backend.set(key, value, ttl).await?;
        if !tags.is_empty() && backend.supports_sets() {
            for tag in tags {
                backend
                    .add_to_set(&format!("{}{}", TAG_KEY_PREFIX, tag), key)
                    .await?;
            }
        }
        Ok(())
    }

    /// Delete every key recorded under each tag, then the tag sets themselves.
    pub async fn invalidate_tags(&self, tags: &[&str]) -> Result<u64> {
        let backend = self.backend(None)?;
        if !backend.supports_sets() {
            return Ok(0);
        }
        let mut removed = 0;
        for tag in tags {
            let tag_key = format!("{}{}", TAG_KEY_PREFIX, tag);
            let members = backend.set_members(&tag_key).await?;
            if !members.is_empty() {
                removed += backend.delete_many(&members).await?;
            }
            backend.delete(&tag_key).await?;
        }
        Ok(removed)
    }

    /// Keyed read-through compute. On a miss the value is computed, stored
    /// with the TTL, and registered under the tags.
    ///
    /// Concurrent callers may compute more than once; compute must be
    /// idempotent when that matters.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[&str],
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backend = self.backend(None)?;
        let started = Instant::now();
        if let Some(raw) = backend.get(key).await? {
            if let Ok(value) = serde_json::from_str::<T>(&raw) {
                self.record("get_or_set", backend.backend_name(), true, started, "cache");
                return Ok(value);
            }
        }
        let value = compute().await?;
        let raw = serde_json::to_string(&value)?;
        self.set_with_tags(key, &raw, ttl, tags).await?;
        self.record("get_or_set", backend.backend_name(), false, started, "cache");
        Ok(value)
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}
