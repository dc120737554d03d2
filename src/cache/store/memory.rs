use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use super::{apply_ttl, CacheStore};
use crate::cache::CachedResponse;
use crate::error::Result;

/// A bounded in-memory backend
///
/// Insertion when full evicts the entry with the smallest `created_at`:
/// oldest-by-insertion, i.e. FIFO rather than true LRU (reads do not touch
/// any recency state). Expiry is lazy, checked on `get` and `has`. A
/// `max_items` of zero retains nothing.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, CachedResponse>>,
    max_items: usize,
    default_ttl: Option<Duration>,
}

impl MemoryStore {
    /// Creates a store bounded to `max_items` entries
    pub fn new(max_items: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_items,
            default_ttl: None,
        }
    }

    /// Sets the TTL applied when `set` receives no explicit TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Number of live entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedResponse>> {
        // A poisoned map only means a writer panicked mid-insert; the data
        // itself is still a coherent HashMap.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn expired(entry: &CachedResponse, now: SystemTime) -> bool {
    entry.expires_at.is_some_and(|expires_at| now > expires_at)
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
        let now = SystemTime::now();
        let mut map = self.lock();
        match map.get(key) {
            Some(entry) if expired(entry, now) => {
                map.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        mut response: CachedResponse,
        ttl: Option<i64>,
    ) -> Result<()> {
        if self.max_items == 0 {
            return Ok(());
        }
        apply_ttl(&mut response, ttl, self.default_ttl);
        let mut map = self.lock();
        if !map.contains_key(key) && map.len() >= self.max_items {
            let oldest = map
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                log::trace!("memory store full, evicting {oldest}");
                map.remove(&oldest);
            }
        }
        map.insert(key.to_string(), response);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let now = SystemTime::now();
        let mut map = self.lock();
        match map.get(key) {
            Some(entry) if expired(entry, now) => {
                map.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    async fn prune(&self) -> Result<usize> {
        let now = SystemTime::now();
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, entry| !expired(entry, now));
        Ok(before - map.len())
    }
}
