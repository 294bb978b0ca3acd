// Redis cache backend.
//
// All commands go through explicit `redis::cmd` invocations over a shared
// connection manager. Pattern invalidation uses SCAN, never KEYS.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::cache::backend::CacheBackend;
use crate::error::{AppError, Result};

pub struct RedisCacheBackend {
    manager: ConnectionManager,
}

impl RedisCacheBackend {
    /// Open a managed connection to the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Configuration(format!("invalid Redis URL: {}", e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::Network(format!("Redis connection failed: {}", e)))?;
        Ok(Self { manager })
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn map_err(e: redis::RedisError) -> AppError {
    AppError::Network(format!("Redis error: {}", e))
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn backend_name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        cmd.query_async::<_, ()>(&mut conn).await.map_err(map_err)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let found: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(found > 0)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn();
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let values: Vec<Option<String>> = cmd.query_async(&mut conn).await.map_err(map_err)?;
        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), v)))
            .collect())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let removed: u64 = cmd.query_async(&mut conn).await.map_err(map_err)?;
        Ok(removed)
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn();
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        // First write creates the key; pin the window TTL then.
        if value == delta {
            if let Some(ttl) = ttl {
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(map_err)?;
            }
        }
        Ok(value)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    fn supports_sets(&self) -> bool {
        true
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }
}
