//! Cache-aside repositories.
//!
//! Each wrapper reads the cache first and falls back to the database on a
//! miss or any cache error, then writes the row back with a fixed TTL.
//! Writes go to the database first; the cache follows and may fail without
//! affecting the caller.

mod note;
mod token;
mod user;

use std::time::Duration;

use notes_common::{AppResult, CacheService};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use note::CachedNoteRepository;
pub use token::{CachedAccessTokenRepository, CachedRefreshTokenRepository};
pub use user::CachedUserRepository;

/// Best-effort JSON cache for one entity type.
#[derive(Clone)]
pub struct CacheAside {
    cache: CacheService,
    prefix: &'static str,
    ttl: Duration,
}

impl CacheAside {
    /// Create a cache namespace for keys `{prefix}:{id}`.
    #[must_use]
    pub const fn new(cache: CacheService, prefix: &'static str, ttl: Duration) -> Self {
        Self { cache, prefix, ttl }
    }

    /// Cache key of an entity.
    #[must_use]
    pub fn key(&self, id: &str) -> String {
        format!("{}:{id}", self.prefix)
    }

    /// Cached value, or `None` on a miss, a cache error or a stale encoding.
    pub async fn read<T: DeserializeOwned>(&self, id: &str) -> Option<T> {
        let key = self.key(id);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    /// Store a value. Failures are logged.
    pub async fn write<T: Serialize + Sync>(&self, id: &str, value: &T) {
        let key = self.key(id);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.cache.set(&key, raw, self.ttl).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    /// Drop a value. Failures are logged.
    pub async fn invalidate(&self, id: &str) {
        let key = self.key(id);
        if let Err(e) = self.cache.delete(&key).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }
}

/// A repository that is the source of truth for one entity type.
#[async_trait::async_trait]
pub trait Authoritative: Send + Sync {
    /// Row type, cached as JSON.
    type Model: Serialize + DeserializeOwned + Send + Sync;

    /// Cache key prefix.
    const PREFIX: &'static str;

    /// Load a row, failing with a not-found error when it is absent.
    async fn load(&self, id: &str) -> AppResult<Self::Model>;
}

/// An authoritative repository with a cache in front of its reads.
#[derive(Clone)]
pub struct CachedRepository<R> {
    inner: R,
    cache: CacheAside,
}

impl<R: Authoritative> CachedRepository<R> {
    /// Wrap `inner`, caching rows for `ttl`.
    #[must_use]
    pub const fn new(inner: R, cache: CacheService, ttl: Duration) -> Self {
        Self {
            inner,
            cache: CacheAside::new(cache, R::PREFIX, ttl),
        }
    }

    /// The wrapped repository.
    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }

    /// Cache-aside read.
    ///
    /// A hit never touches the database. On a miss the database is read once
    /// and a found row is written back once.
    pub async fn get(&self, id: &str) -> AppResult<R::Model> {
        if let Some(model) = self.cache.read(id).await {
            return Ok(model);
        }

        let model = self.inner.load(id).await?;
        self.cache.write(id, &model).await;
        Ok(model)
    }

    /// Populate the cache with a row the caller just wrote.
    pub async fn remember(&self, id: &str, model: &R::Model) {
        self.cache.write(id, model).await;
    }

    /// Drop a row from the cache.
    pub async fn forget(&self, id: &str) {
        self.cache.invalidate(id).await;
    }
}
