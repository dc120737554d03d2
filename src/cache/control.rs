//! RFC 7234 `Cache-Control` parsing and TTL derivation

use std::collections::HashMap;
use std::time::SystemTime;

use http::header::{CACHE_CONTROL, EXPIRES};
use http::HeaderMap;

/// Statuses cacheable by default under RFC 7234 heuristics
const HEURISTICALLY_CACHEABLE: &[u16] =
    &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// A parsed `Cache-Control` header
///
/// Directive names are lowercased, values are unquoted, and numeric values
/// coerce to integers on access. Unknown directives are retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: HashMap<String, Option<String>>,
}

impl CacheControl {
    /// Parses a `Cache-Control` header value
    pub fn parse(value: &str) -> Self {
        let mut directives = HashMap::new();
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.split_once('=') {
                Some((name, value)) => {
                    directives.insert(
                        name.trim().to_ascii_lowercase(),
                        Some(value.trim().trim_matches('"').to_string()),
                    );
                }
                None => {
                    directives.insert(token.to_ascii_lowercase(), None);
                }
            }
        }
        Self { directives }
    }

    /// Parses every `Cache-Control` header in a map, later directives
    /// overriding earlier ones
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut merged = CacheControl::default();
        for value in headers.get_all(CACHE_CONTROL) {
            if let Ok(value) = value.to_str() {
                merged.directives.extend(Self::parse(value).directives);
            }
        }
        merged
    }

    /// True when the named directive is present
    pub fn has(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }

    /// The integer value of a directive, when present and numeric
    pub fn seconds(&self, name: &str) -> Option<i64> {
        self.directives.get(name)?.as_deref()?.parse().ok()
    }

    /// `no-store`
    pub fn no_store(&self) -> bool {
        self.has("no-store")
    }

    /// `no-cache`
    pub fn no_cache(&self) -> bool {
        self.has("no-cache")
    }

    /// `private`
    pub fn private(&self) -> bool {
        self.has("private")
    }

    /// `public`
    pub fn public(&self) -> bool {
        self.has("public")
    }

    /// `must-revalidate`
    pub fn must_revalidate(&self) -> bool {
        self.has("must-revalidate")
    }

    /// `max-age=N`
    pub fn max_age(&self) -> Option<i64> {
        self.seconds("max-age")
    }

    /// `s-maxage=N`
    pub fn s_maxage(&self) -> Option<i64> {
        self.seconds("s-maxage")
    }

    /// `stale-while-revalidate=N`
    pub fn stale_while_revalidate(&self) -> Option<i64> {
        self.seconds("stale-while-revalidate")
    }

    /// `stale-if-error=N`
    pub fn stale_if_error(&self) -> Option<i64> {
        self.seconds("stale-if-error")
    }
}

/// Whether a response may be stored at all, per its directives and status
pub fn should_cache(status: u16, control: &CacheControl, shared: bool) -> bool {
    if control.no_store() {
        return false;
    }
    if shared && control.private() {
        return false;
    }
    HEURISTICALLY_CACHEABLE.contains(&status)
}

/// Header-derived TTL in seconds: `s-maxage` for shared caches, then
/// `max-age`, then the `Expires` header; `None` when nothing applies
pub fn ttl_from_headers(
    headers: &HeaderMap,
    shared: bool,
    now: SystemTime,
) -> Option<i64> {
    let control = CacheControl::from_headers(headers);
    if shared {
        if let Some(s_maxage) = control.s_maxage() {
            return Some(s_maxage);
        }
    }
    if let Some(max_age) = control.max_age() {
        return Some(max_age);
    }
    let expires = headers.get(EXPIRES)?.to_str().ok()?;
    let expires = httpdate::parse_http_date(expires).ok()?;
    Some(match expires.duration_since(now) {
        Ok(remaining) => remaining.as_secs() as i64,
        Err(_) => 0,
    })
}
