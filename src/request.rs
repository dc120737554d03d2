//! The immutable request model and its typed option catalog

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Error, Result};
use crate::uri;

/// A request body variant
///
/// There is no implicit coercion between variants: raw bytes are sent as
/// given, and JSON/form/multipart encoding happens only when explicitly
/// selected.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// Raw bytes with an optional explicit content type
    Bytes {
        /// Explicit `Content-Type`; defaults to `application/octet-stream`
        content_type: Option<String>,
        /// The payload
        data: Bytes,
    },
    /// A JSON document, encoded on send with `Content-Type: application/json`
    Json(Value),
    /// URL-encoded form pairs, encoded with
    /// `Content-Type: application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// Multipart parts, encoded with a computed boundary
    Multipart(Vec<Part>),
}

impl Body {
    /// True when no body is set
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Encodes the body for the wire, returning the content type and payload
    pub fn encode(&self) -> Result<Option<(String, Bytes)>> {
        match self {
            Body::Empty => Ok(None),
            Body::Bytes { content_type, data } => Ok(Some((
                content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".into()),
                data.clone(),
            ))),
            Body::Json(value) => Ok(Some((
                "application/json".into(),
                serde_json::to_vec(value)?.into(),
            ))),
            Body::Form(pairs) => {
                Ok(Some(("application/x-www-form-urlencoded".into(), encode_form(pairs).into())))
            }
            Body::Multipart(parts) => {
                let boundary = multipart_boundary(parts);
                Ok(Some((
                    format!("multipart/form-data; boundary={boundary}"),
                    encode_multipart(parts, &boundary),
                )))
            }
        }
    }

    /// Canonical byte encoding used for cache-key body hashing
    ///
    /// Raw bytes hash as-is; JSON hashes with object keys sorted; forms hash
    /// as a key-sorted query string; multipart hashes its wire encoding.
    pub(crate) fn canonical_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Body::Empty => Ok(Vec::new()),
            Body::Bytes { data, .. } => Ok(data.to_vec()),
            // serde_json maps are ordered by key, so this is canonical
            Body::Json(value) => Ok(serde_json::to_vec(value)?),
            Body::Form(pairs) => {
                let mut sorted = pairs.clone();
                sorted.sort();
                Ok(encode_form(&sorted).into_bytes())
            }
            Body::Multipart(parts) => {
                let boundary = multipart_boundary(parts);
                Ok(encode_multipart(parts, &boundary).to_vec())
            }
        }
    }
}

/// One part of a multipart body
#[derive(Debug, Clone)]
pub struct Part {
    /// Form field name
    pub name: String,
    /// Optional file name
    pub filename: Option<String>,
    /// Optional part content type
    pub content_type: Option<String>,
    /// Part payload
    pub data: Bytes,
}

impl Part {
    /// Creates a text part
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into().into_bytes()),
        }
    }

    /// Creates a binary part
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: data.into(),
        }
    }

    /// Sets the file name
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the part content type
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

fn encode_form(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

// The boundary is derived from the part contents so that encoding is
// deterministic for identical bodies.
fn multipart_boundary(parts: &[Part]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.name.as_bytes());
        hasher.update([0]);
        hasher.update(&part.data);
        hasher.update([0]);
    }
    format!("fetch-{}", &hex::encode(hasher.finalize())[..24])
}

fn encode_multipart(parts: &[Part], boundary: &str) -> Bytes {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        out.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"", part.name)
                .as_bytes(),
        );
        if let Some(filename) = &part.filename {
            out.extend_from_slice(
                format!("; filename=\"{filename}\"").as_bytes(),
            );
        }
        out.extend_from_slice(b"\r\n");
        if let Some(content_type) = &part.content_type {
            out.extend_from_slice(
                format!("Content-Type: {content_type}\r\n").as_bytes(),
            );
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&part.data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Bytes::from(out)
}

/// Per-request cache behavior
///
/// These settings ride on the request; cache-wide policy lives in
/// [`CacheConfig`](crate::CacheConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Whether this request may consult and populate the cache
    pub enabled: bool,
    /// Explicit TTL in seconds, overriding header-derived freshness.
    /// Zero or negative means do not store.
    pub ttl: Option<i64>,
    /// Custom cache key; skips URI normalization entirely, the caller bears
    /// correctness
    pub key: Option<String>,
    /// Skip the cache lookup but store the eventual response
    pub force_refresh: bool,
    /// Consult the response `Cache-Control` headers before storing
    pub respect_headers: bool,
    /// Include a body hash in the cache key for non-GET/HEAD requests
    pub cache_body: bool,
    /// Serve a stale entry for this long past expiry while revalidating in
    /// the background; the response's own `stale-while-revalidate` directive
    /// takes precedence
    pub stale_while_revalidate: Option<Duration>,
    /// Serve a stale entry for this long past expiry when the transport
    /// fails; the response's own `stale-if-error` directive takes precedence
    pub stale_if_error: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
            key: None,
            force_refresh: false,
            respect_headers: true,
            cache_body: false,
            stale_while_revalidate: None,
            stale_if_error: None,
        }
    }
}

/// The typed request option catalog
///
/// Everything the orchestration layer or the transport needs beyond the
/// method, URL, headers, and body. Unknown backend-specific switches travel
/// in `transport_extras` rather than an open-ended option map.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Total deadline for one send, inclusive of retries
    pub timeout: Option<Duration>,
    /// Deadline for the connection phase; defaults to `timeout` when unset
    pub connect_timeout: Option<Duration>,
    /// Retry budget for this call, overriding the client policy
    pub retries: Option<u32>,
    /// Base backoff delay for this call, overriding the client policy
    pub retry_delay: Option<Duration>,
    /// Proxy specification passed through to the transport
    pub proxy: Option<String>,
    /// Cookie jar behavior passed through to the transport
    pub cookies: Option<bool>,
    /// Redirect-following behavior passed through to the transport
    pub allow_redirects: Option<bool>,
    /// Client certificate material passed through to the transport
    pub cert: Option<String>,
    /// Client key material passed through to the transport
    pub ssl_key: Option<String>,
    /// Ask the transport for a streaming body instead of a drained buffer
    pub stream: bool,
    /// Attach a [`DebugInfo`](crate::DebugInfo) record to the response
    pub debug: bool,
    /// Detached send: the request runs in a spawned task and bypasses the
    /// cache entirely
    pub detached: bool,
    /// Per-request cache behavior; `None` inherits the client default
    pub cache: Option<CacheSettings>,
    /// Backend-specific passthrough options
    pub transport_extras: HashMap<String, String>,
}

impl RequestOptions {
    /// Request options layered over client defaults; request values win
    pub(crate) fn merge_over(&self, defaults: &RequestOptions) -> Self {
        let mut extras = defaults.transport_extras.clone();
        extras.extend(
            self.transport_extras.iter().map(|(k, v)| (k.clone(), v.clone())),
        );
        Self {
            timeout: self.timeout.or(defaults.timeout),
            connect_timeout: self.connect_timeout.or(defaults.connect_timeout),
            retries: self.retries.or(defaults.retries),
            retry_delay: self.retry_delay.or(defaults.retry_delay),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            cookies: self.cookies.or(defaults.cookies),
            allow_redirects: self.allow_redirects.or(defaults.allow_redirects),
            cert: self.cert.clone().or_else(|| defaults.cert.clone()),
            ssl_key: self.ssl_key.clone().or_else(|| defaults.ssl_key.clone()),
            stream: self.stream || defaults.stream,
            debug: self.debug || defaults.debug,
            detached: self.detached,
            cache: self.cache.clone().or_else(|| defaults.cache.clone()),
            transport_extras: extras,
        }
    }
}

/// An immutable HTTP request
///
/// Every setter consumes and returns the request, so a shared prototype is
/// never modified in place; clone it first and build on the clone:
///
/// ```rust
/// use fetch_http::Request;
///
/// let prototype = Request::get("https://api.example.com/items")
///     .header("accept", "application/json");
/// let page_two = prototype.clone().query("page", "2");
/// assert_ne!(format!("{prototype:?}"), format!("{page_two:?}"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    url: Option<Url>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Body,
    options: RequestOptions,
    invalid: Option<String>,
}

impl Request {
    /// Creates a request with the given method and target URL
    ///
    /// The target may be relative; it is resolved against the client's base
    /// URL when the request is sent.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            url: None,
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Body::Empty,
            options: RequestOptions::default(),
            invalid: None,
        }
    }

    /// Creates a GET request
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    /// Creates a HEAD request
    pub fn head(target: impl Into<String>) -> Self {
        Self::new(Method::HEAD, target)
    }

    /// Creates a POST request
    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    /// Creates a PUT request
    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    /// Creates a PATCH request
    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    /// Creates a DELETE request
    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    /// Creates an OPTIONS request
    pub fn options_method(target: impl Into<String>) -> Self {
        Self::new(Method::OPTIONS, target)
    }

    /// Replaces the method
    pub fn method_set(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Appends a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => self.note_invalid(format!("invalid header {name:?}")),
        }
        self
    }

    /// Replaces all values of a header
    pub fn header_replace(mut self, name: &str, value: &str) -> Self {
        match (name.parse::<HeaderName>(), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.note_invalid(format!("invalid header {name:?}")),
        }
        self
    }

    /// Merges a set of headers, replacing existing values per name
    pub fn headers_replace(mut self, headers: &[(&str, &str)]) -> Self {
        for (name, value) in headers {
            self = self.header_replace(name, value);
        }
        self
    }

    /// Appends a query parameter
    ///
    /// Supplied keys override any matching key already present on the target
    /// URL when the request is resolved.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Replaces a query parameter, dropping earlier values for the key
    pub fn query_replace(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let key = key.into();
        self.query.retain(|(k, _)| *k != key);
        self.query.push((key, value.into()));
        self
    }

    /// Sets a raw byte body
    pub fn body_bytes(mut self, data: impl Into<Bytes>) -> Self {
        let content_type = match std::mem::take(&mut self.body) {
            Body::Bytes { content_type, .. } => content_type,
            _ => None,
        };
        self.body = Body::Bytes { content_type, data: data.into() };
        self
    }

    /// Sets the explicit content type for a raw body
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.body = match std::mem::take(&mut self.body) {
            Body::Bytes { data, .. } => {
                Body::Bytes { content_type: Some(content_type.into()), data }
            }
            other => {
                self.note_invalid(
                    "content_type applies only to raw byte bodies".into(),
                );
                other
            }
        };
        self
    }

    /// Sets a JSON body
    pub fn json(mut self, value: &impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => self.body = Body::Json(value),
            Err(err) => {
                self.note_invalid(format!("unserializable json body: {err}"))
            }
        }
        self
    }

    /// Sets a URL-encoded form body
    pub fn form(
        mut self,
        pairs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.body = Body::Form(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        self
    }

    /// Sets a multipart body
    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.body = Body::Multipart(parts);
        self
    }

    /// Sets `Authorization: Bearer …`
    pub fn bearer_auth(self, token: &str) -> Self {
        let value = format!("Bearer {token}");
        self.authorization(&value)
    }

    /// Sets `Authorization: Basic …`
    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        let value =
            format!("Basic {}", BASE64.encode(format!("{user}:{password}")));
        self.authorization(&value)
    }

    fn authorization(mut self, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => self.note_invalid("invalid authorization value".into()),
        }
        self
    }

    /// Sets the total send deadline, inclusive of retries
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Sets the connection-phase deadline
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Some(timeout);
        self
    }

    /// Sets the retry budget for this call
    pub fn retries(mut self, retries: u32) -> Self {
        self.options.retries = Some(retries);
        self
    }

    /// Sets the base backoff delay for this call
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay = Some(delay);
        self
    }

    /// Sets the proxy passed through to the transport
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.options.proxy = Some(proxy.into());
        self
    }

    /// Enables or disables the transport cookie jar
    pub fn cookies(mut self, enabled: bool) -> Self {
        self.options.cookies = Some(enabled);
        self
    }

    /// Enables or disables redirect following
    pub fn allow_redirects(mut self, enabled: bool) -> Self {
        self.options.allow_redirects = Some(enabled);
        self
    }

    /// Sets client TLS material passed through to the transport
    pub fn tls_material(
        mut self,
        cert: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.options.cert = Some(cert.into());
        self.options.ssl_key = Some(key.into());
        self
    }

    /// Asks the transport for a streaming body
    pub fn stream(mut self) -> Self {
        self.options.stream = true;
        self
    }

    /// Attaches a [`DebugInfo`](crate::DebugInfo) record to the response
    pub fn debug(mut self) -> Self {
        self.options.debug = true;
        self
    }

    /// Sets a backend-specific passthrough option
    pub fn transport_extra(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.options.transport_extras.insert(key.into(), value.into());
        self
    }

    /// Replaces the per-request cache settings
    pub fn cache(mut self, settings: CacheSettings) -> Self {
        self.options.cache = Some(settings);
        self
    }

    /// Enables caching with an explicit TTL in seconds
    pub fn cache_ttl(mut self, seconds: i64) -> Self {
        let mut settings = self.options.cache.take().unwrap_or_default();
        settings.ttl = Some(seconds);
        self.options.cache = Some(settings);
        self
    }

    /// Disables caching for this request
    pub fn no_cache(mut self) -> Self {
        let mut settings = self.options.cache.take().unwrap_or_default();
        settings.enabled = false;
        self.options.cache = Some(settings);
        self
    }

    /// Skips the cache lookup but stores the eventual response
    pub fn force_refresh(mut self) -> Self {
        let mut settings = self.options.cache.take().unwrap_or_default();
        settings.force_refresh = true;
        self.options.cache = Some(settings);
        self
    }

    /// The request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The raw target as given to the constructor
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The absolute URL, present once the request has been resolved
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The request options
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Pending query parameters not yet merged into the URL
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    pub(crate) fn options_mut(&mut self) -> &mut RequestOptions {
        &mut self.options
    }

    pub(crate) fn insert_header(
        &mut self,
        name: HeaderName,
        value: HeaderValue,
    ) {
        self.headers.insert(name, value);
    }

    /// Effective cache settings for this request
    pub(crate) fn cache_settings(&self) -> CacheSettings {
        self.options.cache.clone().unwrap_or_default()
    }

    /// Resolves the target against a base URL, merges query parameters, and
    /// validates the body/method pairing
    ///
    /// Returns a request whose [`url`](Request::url) is absolute. Deferred
    /// builder errors (bad header names, unserializable bodies) surface
    /// here.
    pub fn resolve(mut self, base: Option<&Url>) -> Result<Self> {
        if let Some(reason) = self.invalid.take() {
            return Err(Error::InvalidInput(reason));
        }
        if !self.body.is_empty() {
            if self.method == Method::DELETE {
                log::warn!(
                    "DELETE request to {} carries a body",
                    self.target
                );
            } else if self.method != Method::POST
                && self.method != Method::PUT
                && self.method != Method::PATCH
            {
                return Err(Error::InvalidInput(format!(
                    "{} requests cannot carry a body",
                    self.method
                )));
            }
        }
        let url = uri::resolve(base, &self.target, &self.query)?;
        self.query.clear();
        self.url = Some(url);
        Ok(self)
    }

    /// The absolute URL, or an error when the request is unresolved
    pub(crate) fn absolute_url(&self) -> Result<&Url> {
        self.url.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!(
                "request for {:?} has not been resolved",
                self.target
            ))
        })
    }

    fn note_invalid(&mut self, reason: String) {
        if self.invalid.is_none() {
            self.invalid = Some(reason);
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) => write!(f, "{} {}", self.method, url),
            None => write!(f, "{} {}", self.method, self.target),
        }
    }
}
