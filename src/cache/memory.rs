// In-memory cache backend.
//
// TTL expiry is lazy: expired entries are dropped when touched and swept by
// `keys_matching`/`clear`. Suitable for single-process deployments and tests.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::backend::{glob_to_regex, CacheBackend};
use crate::error::{AppError, Result};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<String, Entry>,
    sets: DashMap<String, HashSet<String>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.entries.remove(key).is_some();
        self.sets.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_value(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        self.sets.clear();
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        // Entry-level lock makes the read-modify-write atomic.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: ttl.map(|d| Instant::now() + d),
        });
        if entry.expired() {
            entry.value = "0".to_string();
            entry.expires_at = ttl.map(|d| Instant::now() + d);
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| AppError::Serialization(format!("non-integer value at key {}", key)))?;
        let next = current + delta;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let re = glob_to_regex(pattern);
        let mut matched = Vec::new();
        let mut dead = Vec::new();
        for entry in self.entries.iter() {
            if entry.value().expired() {
                dead.push(entry.key().clone());
            } else if re.is_match(entry.key()) {
                matched.push(entry.key().clone());
            }
        }
        for key in dead {
            self.entries.remove(&key);
        }
        Ok(matched)
    }

    fn supports_sets(&self) -> bool {
        true
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.live_value(key) {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCacheBackend::new();
        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert!(cache.exists("k").await.unwrap());
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCacheBackend::new();
        cache
            .set("k", "v", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment() {
        let cache = MemoryCacheBackend::new();
        assert_eq!(cache.increment("n", 1, None).await.unwrap(), 1);
        assert_eq!(cache.increment("n", 2, None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_keys_matching() {
        let cache = MemoryCacheBackend::new();
        cache.set("chat:room:a", "1", None).await.unwrap();
        cache.set("chat:room:b", "1", None).await.unwrap();
        cache.set("other", "1", None).await.unwrap();

        let mut keys = cache.keys_matching("chat:room:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["chat:room:a", "chat:room:b"]);
    }

    #[tokio::test]
    async fn test_sets() {
        let cache = MemoryCacheBackend::new();
        cache.add_to_set("cache:tag:product", "k1").await.unwrap();
        cache.add_to_set("cache:tag:product", "k2").await.unwrap();
        cache.add_to_set("cache:tag:product", "k1").await.unwrap();

        let mut members = cache.set_members("cache:tag:product").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_get_many() {
        let cache = MemoryCacheBackend::new();
        cache.set("a", "1", None).await.unwrap();
        cache.set("b", "2", None).await.unwrap();

        let found = cache
            .get_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("a").map(String::as_str), Some("1"));
    }
}
