//! RFC 7234 caching: keying, freshness, revalidation, and stale policies
//!
//! [`HttpCache`] is the policy orchestrator. It owns a pluggable
//! [`CacheStore`] backend and decides, per request, whether to serve from
//! cache, revalidate, or go to the network; the executor acts on the
//! returned [`CacheLookup`]. Observable cache outcomes are surfaced to
//! callers through the [`XCACHESTATUS`] response header.

pub mod control;
pub(crate) mod key;
pub mod store;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::Method;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::headers::HeaderBag;
use crate::request::{CacheSettings, Request};
use crate::response::{url_host, Response};
use control::CacheControl;
pub use store::CacheStore;

/// `x-cache-status` header: exposes the cache outcome of a send
///
/// Carries one of `HIT`, `STALE`, `REVALIDATED`, or `STALE-IF-ERROR`. On
/// miss, bypass, and synchronous revalidation the header is absent.
pub const XCACHESTATUS: &str = "x-cache-status";

// Headers never copied from a 304 onto the cached representation
const NOT_MODIFIED_SKIP: &[&str] =
    &["content-length", "content-encoding", "transfer-encoding"];

/// The cache outcome stamped into [`XCACHESTATUS`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served fresh from cache, no network involved
    Hit,
    /// Served stale while a background revalidation runs
    Stale,
    /// A conditional request came back `304 Not Modified`; the cached body
    /// was reused with refreshed headers
    Revalidated,
    /// The transport failed and a stale entry was served instead
    StaleIfError,
}

impl CacheStatus {
    /// The header value for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::StaleIfError => "STALE-IF-ERROR",
        }
    }

    fn apply(self, response: &mut Response) {
        response.insert_header(XCACHESTATUS, self.as_str());
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached response snapshot
///
/// Invariant: when `expires_at` is set it is never earlier than
/// `created_at`. An entry is fresh while `now <= expires_at` (or forever
/// when `expires_at` is absent), and usable as stale for a window `w` while
/// `now <= expires_at + w`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Cached status code
    pub status: u16,
    /// Cached headers
    pub headers: HeaderBag,
    /// Cached body
    pub body: Vec<u8>,
    /// When the entry was stored
    pub created_at: SystemTime,
    /// When the entry stops being fresh; `None` means it never expires
    pub expires_at: Option<SystemTime>,
    /// The `ETag` validator, when the origin sent one
    pub etag: Option<String>,
    /// The `Last-Modified` validator, when the origin sent one
    pub last_modified: Option<String>,
    /// Opaque metadata stored alongside the entry
    #[serde(default)]
    pub metadata: Option<Vec<u8>>,
}

impl CachedResponse {
    /// Snapshots a response for storage; `created_at`/`expires_at` are
    /// stamped by the store
    pub fn from_response(response: &Response) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: response.headers().into(),
            body: response.body().to_vec(),
            created_at: SystemTime::now(),
            expires_at: None,
            etag: response.header("etag").map(str::to_string),
            last_modified: response.header("last-modified").map(str::to_string),
            metadata: None,
        }
    }

    /// True while the entry has not passed `expires_at`
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now <= expires_at,
            None => true,
        }
    }

    /// True while the entry is within `window` past `expires_at`
    pub fn usable_as_stale(&self, window: Duration, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now <= expires_at + window,
            None => true,
        }
    }

    /// The entry's own parsed `Cache-Control`
    pub fn cache_control(&self) -> CacheControl {
        self.headers
            .get("cache-control")
            .map(CacheControl::parse)
            .unwrap_or_default()
    }

    /// Rebuilds a [`Response`] from the snapshot
    pub fn to_response(&self) -> Result<Response> {
        let mut response = Response::from_status(self.status)?
            .with_body(self.body.clone());
        for (name, value) in self.headers.iter() {
            response.append_header(name, value);
        }
        Ok(response)
    }
}

/// A closure that takes a [`Request`] and returns the cache key for it,
/// replacing the built-in fingerprint. The namespace prefix is still
/// applied; normalization is skipped entirely.
pub type CacheKeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Cache-wide policy knobs
#[derive(Clone)]
pub struct CacheConfig {
    /// Treat this as a shared cache: honor `s-maxage`, refuse `private`
    /// responses
    pub shared: bool,
    /// TTL used when neither the request nor the response headers provide
    /// one
    pub default_ttl: Duration,
    /// Upper bound clamped onto every computed TTL
    pub max_ttl: Option<Duration>,
    /// Prefix applied to every cache key
    pub namespace: String,
    /// Request headers whose values participate in the cache key
    pub vary_headers: Vec<String>,
    /// Methods whose responses may be stored
    pub cacheable_methods: Vec<Method>,
    /// Statuses whose responses may be stored
    pub cacheable_statuses: Vec<u16>,
    /// Override the default cache key generator
    pub cache_key_fn: Option<CacheKeyFn>,
    /// Whether cache outcomes are stamped into [`XCACHESTATUS`]
    pub cache_status_headers: bool,
    /// Cache-wide stale-while-revalidate window, when responses and
    /// requests are silent
    pub stale_while_revalidate: Option<Duration>,
    /// Cache-wide stale-if-error window, when responses and requests are
    /// silent
    pub stale_if_error: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shared: false,
            default_ttl: Duration::from_secs(3600),
            max_ttl: None,
            namespace: "fetch-http".into(),
            vary_headers: vec![
                "accept".into(),
                "accept-encoding".into(),
                "accept-language".into(),
            ],
            cacheable_methods: vec![Method::GET, Method::HEAD],
            cacheable_statuses: vec![200, 203, 204, 206, 300, 301, 404, 410],
            cache_key_fn: None,
            cache_status_headers: true,
            stale_while_revalidate: None,
            stale_if_error: None,
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("shared", &self.shared)
            .field("default_ttl", &self.default_ttl)
            .field("max_ttl", &self.max_ttl)
            .field("namespace", &self.namespace)
            .field("vary_headers", &self.vary_headers)
            .field("cacheable_methods", &self.cacheable_methods)
            .field("cacheable_statuses", &self.cacheable_statuses)
            .field("cache_key_fn", &"Fn(&Request) -> String")
            .field("cache_status_headers", &self.cache_status_headers)
            .field("stale_while_revalidate", &self.stale_while_revalidate)
            .field("stale_if_error", &self.stale_if_error)
            .finish()
    }
}

/// The decision produced by the lookup path for one request
#[derive(Debug)]
pub enum CacheLookup {
    /// Caching is off for this request; no key was computed
    Bypass,
    /// `force_refresh` skipped the lookup; the response will still be stored
    Refresh {
        /// The key to store the eventual response under
        key: String,
    },
    /// Nothing cached under the key
    Miss {
        /// The key to store the eventual response under
        key: String,
    },
    /// A fresh entry was found; the response is ready to return
    Hit {
        /// The cached response, status header applied
        response: Response,
    },
    /// An entry expired within its stale-while-revalidate window; serve it
    /// and revalidate in the background
    Stale {
        /// The key to refresh
        key: String,
        /// The cached response, status header and warning applied
        response: Response,
    },
    /// A fresh entry demands revalidation (`no-cache`); send conditionally
    Revalidate {
        /// The key to refresh
        key: String,
        /// The entry to merge a `304` into, or fall back on
        cached: CachedResponse,
    },
    /// The entry expired outright; send conditionally and keep it for a
    /// `304` merge or stale-if-error
    Expired {
        /// The key to refresh
        key: String,
        /// The entry to merge a `304` into, or fall back on
        cached: CachedResponse,
    },
}

impl CacheLookup {
    /// The decision label emitted into logs
    pub fn label(&self) -> &'static str {
        match self {
            CacheLookup::Bypass => "BYPASS",
            CacheLookup::Refresh { .. } => "REFRESH",
            CacheLookup::Miss { .. } => "MISS",
            CacheLookup::Hit { .. } => "HIT",
            CacheLookup::Stale { .. } => "STALE",
            CacheLookup::Revalidate { .. } => "REVALIDATE",
            CacheLookup::Expired { .. } => "EXPIRED",
        }
    }
}

/// Caches responses according to the http spec, against a pluggable backend
#[derive(Clone)]
pub struct HttpCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCache").field("config", &self.config).finish_non_exhaustive()
    }
}

impl HttpCache {
    /// Creates a cache over the given backend with default config
    pub fn new(store: impl CacheStore) -> Self {
        Self { store: Arc::new(store), config: CacheConfig::default() }
    }

    /// Creates a cache over the given backend with explicit config
    pub fn with_config(store: impl CacheStore, config: CacheConfig) -> Self {
        Self { store: Arc::new(store), config }
    }

    /// The backend this cache stores into
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// The cache-wide configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Runs the lookup decision tree for a resolved request
    pub async fn lookup(&self, request: &Request) -> Result<CacheLookup> {
        let settings = request.cache_settings();
        if !settings.enabled {
            return Ok(self.decided(request, CacheLookup::Bypass));
        }
        let key = key::generate(request, &self.config)?;
        if settings.force_refresh {
            return Ok(self.decided(request, CacheLookup::Refresh { key }));
        }
        let Some(cached) = self.store.get(&key).await? else {
            return Ok(self.decided(request, CacheLookup::Miss { key }));
        };
        let now = SystemTime::now();
        if cached.is_fresh(now) {
            if cached.cache_control().no_cache() {
                return Ok(self
                    .decided(request, CacheLookup::Revalidate { key, cached }));
            }
            let mut response = cached.to_response()?;
            if self.config.cache_status_headers {
                CacheStatus::Hit.apply(&mut response);
            }
            return Ok(self.decided(request, CacheLookup::Hit { response }));
        }
        let swr_window = stale_window(
            cached.cache_control().stale_while_revalidate(),
            settings.stale_while_revalidate,
            self.config.stale_while_revalidate,
        );
        if let Some(window) = swr_window {
            if cached.usable_as_stale(window, now) {
                let mut response = cached.to_response()?;
                if self.config.cache_status_headers {
                    CacheStatus::Stale.apply(&mut response);
                }
                if let Ok(url) = request.absolute_url() {
                    response.add_warning(
                        &url_host(url),
                        110,
                        "Response is stale",
                    );
                }
                return Ok(
                    self.decided(request, CacheLookup::Stale { key, response })
                );
            }
        }
        Ok(self.decided(request, CacheLookup::Expired { key, cached }))
    }

    fn decided(&self, request: &Request, lookup: CacheLookup) -> CacheLookup {
        log::debug!("cache {}: {}", lookup.label(), request);
        lookup
    }

    /// Stores a response when the request, method, status, and headers all
    /// permit it; reports whether it was stored
    pub async fn store_response(
        &self,
        cache_key: &str,
        request: &Request,
        response: &Response,
    ) -> Result<bool> {
        let settings = request.cache_settings();
        if !settings.enabled {
            return Ok(false);
        }
        if !self.config.cacheable_methods.contains(request.method()) {
            return Ok(false);
        }
        let status = response.status().as_u16();
        if !self.config.cacheable_statuses.contains(&status) {
            return Ok(false);
        }
        let control = CacheControl::from_headers(response.headers());
        if settings.respect_headers
            && !control::should_cache(status, &control, self.config.shared)
        {
            log::debug!("cache store refused by headers: {request}");
            return Ok(false);
        }
        let ttl = self.compute_ttl(&settings, response);
        if ttl <= 0 {
            return Ok(false);
        }
        let entry = CachedResponse::from_response(response);
        self.store.set(cache_key, entry, Some(ttl)).await?;
        log::debug!("cache stored ({ttl}s): {request}");
        Ok(true)
    }

    /// TTL precedence: per-request, then response headers (when respected),
    /// then the cache default; always clamped to `max_ttl`
    fn compute_ttl(
        &self,
        settings: &CacheSettings,
        response: &Response,
    ) -> i64 {
        let header_ttl = if settings.respect_headers {
            control::ttl_from_headers(
                response.headers(),
                self.config.shared,
                SystemTime::now(),
            )
        } else {
            None
        };
        let ttl = settings
            .ttl
            .or(header_ttl)
            .unwrap_or(self.config.default_ttl.as_secs() as i64);
        match self.config.max_ttl {
            Some(cap) => ttl.min(cap.as_secs() as i64),
            None => ttl,
        }
    }

    /// Merges a `304 Not Modified` into the cached entry, re-stores it with
    /// a refreshed TTL, and returns the merged response
    pub async fn merge_not_modified(
        &self,
        cache_key: &str,
        mut cached: CachedResponse,
        request: &Request,
        not_modified: &Response,
    ) -> Result<Response> {
        for (name, value) in not_modified.headers() {
            let name = name.as_str().to_ascii_lowercase();
            if NOT_MODIFIED_SKIP.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                cached.headers.insert(&name, value);
            }
        }
        cached.etag = cached.headers.get("etag").map(str::to_string);
        cached.last_modified =
            cached.headers.get("last-modified").map(str::to_string);

        let merged = cached.to_response()?;
        let ttl = self.compute_ttl(&request.cache_settings(), &merged);
        if ttl > 0 {
            self.store.set(cache_key, cached, Some(ttl)).await?;
        }
        let mut response = merged;
        if self.config.cache_status_headers {
            CacheStatus::Revalidated.apply(&mut response);
        }
        log::debug!("cache REVALIDATED: {request}");
        Ok(response)
    }

    /// Serves the kept entry when the transport failed with a network-class
    /// error and the entry is within its stale-if-error window
    pub async fn serve_stale_on_error(
        &self,
        request: &Request,
        cached: &CachedResponse,
    ) -> Result<Option<Response>> {
        let settings = request.cache_settings();
        let window = stale_window(
            cached.cache_control().stale_if_error(),
            settings.stale_if_error,
            self.config.stale_if_error,
        );
        let Some(window) = window else {
            return Ok(None);
        };
        if !cached.usable_as_stale(window, SystemTime::now()) {
            return Ok(None);
        }
        let mut response = cached.to_response()?;
        if self.config.cache_status_headers {
            CacheStatus::StaleIfError.apply(&mut response);
        }
        if let Ok(url) = request.absolute_url() {
            let host = url_host(url);
            response.add_warning(&host, 110, "Response is stale");
            response.add_warning(&host, 111, "Revalidation failed");
        }
        log::debug!("cache STALE-IF-ERROR: {request}");
        Ok(Some(response))
    }

    /// Drops the cached GET entry for the URI of an unsafe-method request
    pub async fn invalidate_unsafe(&self, request: &Request) {
        let Ok(key) =
            key::generate_for_method(request, &Method::GET, &self.config)
        else {
            return;
        };
        if let Err(err) = self.store.delete(&key).await {
            log::debug!("cache invalidation failed for {request}: {err}");
        }
    }

    /// Injects `If-None-Match`/`If-Modified-Since` validators from a kept
    /// entry into a request about to be revalidated
    pub fn add_conditional_headers(
        request: &mut Request,
        cached: &CachedResponse,
    ) {
        use http::header::{HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
        if let Some(etag) = &cached.etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                request.insert_header(IF_NONE_MATCH, value);
            }
        }
        if let Some(last_modified) = &cached.last_modified {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                request.insert_header(IF_MODIFIED_SINCE, value);
            }
        }
    }
}

fn stale_window(
    directive: Option<i64>,
    request_setting: Option<Duration>,
    config_setting: Option<Duration>,
) -> Option<Duration> {
    directive
        .map(|seconds| Duration::from_secs(seconds.max(0) as u64))
        .or(request_setting)
        .or(config_setting)
}
