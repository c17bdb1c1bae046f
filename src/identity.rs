//! Cache-aside identity resolution.
//!
//! The durable store is the source of truth. The cache is best-effort and
//! never holds negative entries: a miss always goes back to the store.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{Database, StoreError, User};

/// Failure of the cache infrastructure itself (not a miss).
#[derive(Debug, thiserror::Error)]
#[error("identity cache unavailable: {0}")]
pub struct CacheError(pub String);

/// Fast identity cache. `Ok(None)` is a miss, distinct from `Err`.
#[async_trait]
pub trait IdentityCache: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<User>, CacheError>;
    async fn set(&self, user: &User) -> Result<(), CacheError>;
    async fn invalidate(&self, id: i64) -> Result<(), CacheError>;
}

/// Durable lookup of identities by ID.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn get_identity_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
}

#[async_trait]
impl IdentitySource for Database {
    async fn get_identity_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.users().get_by_id(id).await
    }
}

/// In-process identity cache with TTL and a capacity bound.
pub struct MokaIdentityCache {
    cache: Cache<i64, User>,
}

impl MokaIdentityCache {
    /// Create a cache whose entries expire after `ttl`.
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self { cache }
    }

    /// Approximate number of cached identities.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl IdentityCache for MokaIdentityCache {
    async fn get(&self, id: i64) -> Result<Option<User>, CacheError> {
        Ok(self.cache.get(&id).await)
    }

    async fn set(&self, user: &User) -> Result<(), CacheError> {
        self.cache.insert(user.id, user.clone()).await;
        Ok(())
    }

    async fn invalidate(&self, id: i64) -> Result<(), CacheError> {
        self.cache.invalidate(&id).await;
        Ok(())
    }
}

/// Why an identity could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("identity not found")]
    NotFound,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves a verified subject ID into a full identity.
#[derive(Clone)]
pub struct IdentityResolver {
    source: Arc<dyn IdentitySource>,
    cache: Option<Arc<dyn IdentityCache>>,
}

impl IdentityResolver {
    /// `cache: None` disables caching; every call then reads the store.
    pub fn new(source: Arc<dyn IdentitySource>, cache: Option<Arc<dyn IdentityCache>>) -> Self {
        Self { source, cache }
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Resolve an identity, reading the store at most once.
    ///
    /// A cache error fails the call rather than falling back to the store, and
    /// a failed cache population fails it too, so cache outages stay visible.
    pub async fn resolve(&self, id: i64) -> Result<User, ResolveError> {
        let Some(cache) = &self.cache else {
            return self
                .source
                .get_identity_by_id(id)
                .await?
                .ok_or(ResolveError::NotFound);
        };

        if let Some(user) = cache.get(id).await? {
            return Ok(user);
        }

        let user = self
            .source
            .get_identity_by_id(id)
            .await?
            .ok_or(ResolveError::NotFound)?;

        // Populate only after the authoritative read.
        cache.set(&user).await?;
        Ok(user)
    }

    /// Drop a cached identity after it changed in the store. Best-effort.
    pub async fn forget(&self, id: i64) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(id).await {
                tracing::warn!(user_id = id, error = %e, "Failed to invalidate cached identity");
            }
        }
    }
}
