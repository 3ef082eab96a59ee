//! Key/value cache with per-key expiry.
//!
//! The cache is never authoritative. Callers treat every error as a miss
//! and fall back to the database.

use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cache capability.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Get a cached value. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a value.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Shared cache handle.
pub type CacheService = Arc<dyn Cache>;

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCache {
    redis: Arc<RedisClient>,
    prefix: String,
}

impl RedisCache {
    /// Create a new Redis cache namespaced under `prefix`.
    #[must_use]
    pub const fn new(redis: Arc<RedisClient>, prefix: String) -> Self {
        Self { redis, prefix }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait::async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = self
            .redis
            .get(self.namespaced(key))
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))?;

        debug!(key = %key, hit = value.is_some(), "Cache lookup");
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);

        self.redis
            .set::<(), _, _>(
                self.namespaced(key),
                value,
                Some(Expiration::EX(ttl_secs)),
                None,
                false,
            )
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.redis
            .del::<(), _>(self.namespaced(key))
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))
    }
}

/// Cache that stores nothing. Used when Redis is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait::async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Cache error type.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),
}

impl From<CacheError> for crate::AppError {
    fn from(err: CacheError) -> Self {
        Self::Cache(err.to_string())
    }
}
