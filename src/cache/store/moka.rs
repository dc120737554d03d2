use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use moka::future::Cache;

use super::{apply_ttl, CacheStore};
use crate::cache::CachedResponse;
use crate::error::{Error, Result};

/// Implements [`CacheStore`] with [`moka`](https://github.com/moka-rs/moka)
/// as the backend
///
/// Unlike [`MemoryStore`](super::MemoryStore), eviction policy belongs to
/// moka; this store only enforces the entry-level TTL contract on read.
#[cfg_attr(docsrs, doc(cfg(feature = "store-moka")))]
#[derive(Clone)]
pub struct MokaStore {
    cache: Arc<Cache<String, Arc<Vec<u8>>>>,
    default_ttl: Option<Duration>,
}

impl fmt::Debug for MokaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MokaStore").finish_non_exhaustive()
    }
}

impl MokaStore {
    /// Create a new store from a pre-configured cache
    pub fn new(cache: Cache<String, Arc<Vec<u8>>>) -> Self {
        Self { cache: Arc::new(cache), default_ttl: None }
    }

    /// Create a new store bounded to `max_capacity` entries
    pub fn bounded(max_capacity: u64) -> Self {
        Self::new(Cache::new(max_capacity))
    }

    /// Sets the TTL applied when `set` receives no explicit TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }
}

fn decode(bytes: &[u8]) -> Result<CachedResponse> {
    postcard::from_bytes(bytes)
        .map_err(|err| Error::CacheBackend { reason: err.to_string() })
}

#[async_trait::async_trait]
impl CacheStore for MokaStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
        let Some(bytes) = self.cache.get(key).await else {
            return Ok(None);
        };
        let entry = decode(&bytes)?;
        let now = SystemTime::now();
        if entry.expires_at.is_some_and(|expires_at| now > expires_at) {
            self.cache.invalidate(key).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(
        &self,
        key: &str,
        mut response: CachedResponse,
        ttl: Option<i64>,
    ) -> Result<()> {
        apply_ttl(&mut response, ttl, self.default_ttl);
        let bytes = postcard::to_allocvec(&response)
            .map_err(|err| Error::CacheBackend { reason: err.to_string() })?;
        self.cache.insert(key.to_string(), Arc::new(bytes)).await;
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.cache.contains_key(key);
        self.cache.invalidate(key).await;
        self.cache.run_pending_tasks().await;
        Ok(existed)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn prune(&self) -> Result<usize> {
        let now = SystemTime::now();
        let mut expired_keys: Vec<String> = Vec::new();
        for (key, bytes) in self.cache.iter() {
            let stale = match decode(&bytes) {
                Ok(entry) => entry
                    .expires_at
                    .is_some_and(|expires_at| now > expires_at),
                Err(_) => true,
            };
            if stale {
                expired_keys.push(key.as_ref().clone());
            }
        }
        let removed = expired_keys.len();
        for key in expired_keys {
            self.cache.invalidate(&key).await;
        }
        self.cache.run_pending_tasks().await;
        Ok(removed)
    }
}
