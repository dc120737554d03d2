//! Pluggable cache storage backends

use std::time::{Duration, SystemTime};

use super::CachedResponse;
use crate::error::Result;

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "store-file")]
mod file;
#[cfg(feature = "store-file")]
pub use file::FileStore;

#[cfg(feature = "store-moka")]
mod moka;
#[cfg(feature = "store-moka")]
pub use self::moka::MokaStore;

/// A trait providing methods for storing, reading, and removing cache
/// records
///
/// TTL semantics for [`set`](CacheStore::set): `None` uses the backend
/// default, `Some(0)` stores without expiry, and a negative value stores the
/// record already expired (negative caching).
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Attempts to pull a cached response. Expired entries are lazily
    /// removed and reported as absent.
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>>;
    /// Attempts to cache a response with the given TTL in seconds
    async fn set(
        &self,
        key: &str,
        response: CachedResponse,
        ttl: Option<i64>,
    ) -> Result<()>;
    /// Attempts to remove a record, reporting whether one existed
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Checks whether a live record exists
    async fn has(&self, key: &str) -> Result<bool>;
    /// Removes every record
    async fn clear(&self) -> Result<()>;
    /// Walks all records and removes the expired ones, returning how many
    /// were removed
    async fn prune(&self) -> Result<usize>;
}

/// Stamps `created_at`/`expires_at` on an entry per the TTL contract.
///
/// A negative TTL clamps `expires_at` to `created_at` so the entry is
/// expired on arrival while the `expires_at >= created_at` invariant holds.
pub(crate) fn apply_ttl(
    entry: &mut CachedResponse,
    ttl: Option<i64>,
    backend_default: Option<Duration>,
) {
    let now = SystemTime::now();
    entry.created_at = now;
    entry.expires_at = match ttl {
        None => backend_default.map(|default| now + default),
        Some(0) => None,
        Some(seconds) if seconds < 0 => Some(now),
        Some(seconds) => Some(now + Duration::from_secs(seconds as u64)),
    };
}
