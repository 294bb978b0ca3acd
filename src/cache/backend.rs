// Cache backend contract.
//
// Values cross the boundary as strings; callers JSON-encode structured data
// through the manager helpers. Set operations are a capability the tag
// invalidation layer probes for before use.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend identifier used in metrics labels and manager registration.
    fn backend_name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set_many(&self, entries: &HashMap<String, String>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Atomically add `delta` to an integer value, creating it at zero. The
    /// TTL is applied only when the key is created. Used by rolling-window
    /// rate limiters.
    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64>;

    /// Keys matching a glob-style pattern (`*` wildcard). Backed by SCAN on
    /// Redis and by iteration on the memory backend.
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;

    /// Whether this backend supports set members (needed for tag tracking).
    fn supports_sets(&self) -> bool {
        false
    }

    async fn add_to_set(&self, _key: &str, _member: &str) -> Result<()> {
        Err(AppError::Unavailable(format!(
            "cache backend '{}' does not support sets",
            self.backend_name()
        )))
    }

    async fn set_members(&self, _key: &str) -> Result<Vec<String>> {
        Err(AppError::Unavailable(format!(
            "cache backend '{}' does not support sets",
            self.backend_name()
        )))
    }
}

/// Translate a glob pattern (only `*` is special) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> regex::Regex {
    let mut expr = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    // Escaped input cannot produce an invalid expression.
    regex::Regex::new(&expr).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("permission:check:*");
        assert!(re.is_match("permission:check:u1:product:read"));
        assert!(!re.is_match("permissions:user:u1"));

        let literal = glob_to_regex("a.b");
        assert!(literal.is_match("a.b"));
        assert!(!literal.is_match("axb"));
    }
}
