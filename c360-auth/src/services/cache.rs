use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::ServiceError;

/// Small key/value cache for short-lived, single-use values.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), ServiceError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError>;
    /// Atomically reads and removes a value.
    async fn take(&self, key: &str) -> Result<Option<String>, ServiceError>;
    async fn delete(&self, key: &str) -> Result<(), ServiceError>;
    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, ServiceError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            ServiceError::Cache(anyhow::anyhow!("Failed to connect to Redis: {}", e))
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl KeyValueCache for RedisService {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let mut conn = self.manager.clone();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let mut conn = self.manager.clone();
        Ok(redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| ServiceError::Cache(anyhow::anyhow!("Redis health check failed: {}", e)))?;
        Ok(())
    }
}

/// In-memory cache honouring TTLs, for tests and local runs.
#[derive(Default)]
pub struct MockCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, ServiceError> {
        self.entries
            .lock()
            .map_err(|_| ServiceError::Cache(anyhow::anyhow!("mock cache poisoned")))
    }
}

#[async_trait]
impl KeyValueCache for MockCache {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), ServiceError> {
        let deadline = Instant::now() + Duration::from_secs(ttl_seconds);
        self.lock()?
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let entries = self.lock()?;
        Ok(entries
            .get(key)
            .filter(|(_, deadline)| *deadline > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, ServiceError> {
        Ok(self
            .lock()?
            .remove(key)
            .filter(|(_, deadline)| *deadline > Instant::now())
            .map(|(value, _)| value))
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_take_is_single_use() {
        let cache = MockCache::new();
        cache.put("magic:abc", "a@x.com", 900).await.unwrap();

        assert_eq!(cache.get("magic:abc").await.unwrap().as_deref(), Some("a@x.com"));
        assert_eq!(cache.take("magic:abc").await.unwrap().as_deref(), Some("a@x.com"));
        assert_eq!(cache.take("magic:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let cache = MockCache::new();
        cache.put("k", "v", 0).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.take("k").await.unwrap(), None);
    }
}
