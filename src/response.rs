//! The drained response value, version tag, and per-response debug record

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::Result;

/// `warning` header: HTTP warning header as per RFC 7234
pub(crate) const WARNING: &str = "warning";

/// Represents an HTTP version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub enum HttpVersion {
    /// HTTP Version 0.9
    #[serde(rename = "HTTP/0.9")]
    Http09,
    /// HTTP Version 1.0
    #[serde(rename = "HTTP/1.0")]
    Http10,
    /// HTTP Version 1.1
    #[serde(rename = "HTTP/1.1")]
    Http11,
    /// HTTP Version 2.0
    #[serde(rename = "HTTP/2.0")]
    H2,
    /// HTTP Version 3.0
    #[serde(rename = "HTTP/3.0")]
    H3,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::Http09 => write!(f, "HTTP/0.9"),
            HttpVersion::Http10 => write!(f, "HTTP/1.0"),
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
            HttpVersion::H2 => write!(f, "HTTP/2.0"),
            HttpVersion::H3 => write!(f, "HTTP/3.0"),
        }
    }
}

impl Default for HttpVersion {
    fn default() -> Self {
        HttpVersion::Http11
    }
}

impl From<http::Version> for HttpVersion {
    fn from(value: http::Version) -> Self {
        match value {
            http::Version::HTTP_09 => Self::Http09,
            http::Version::HTTP_10 => Self::Http10,
            http::Version::HTTP_2 => Self::H2,
            http::Version::HTTP_3 => Self::H3,
            _ => Self::Http11,
        }
    }
}

impl From<HttpVersion> for http::Version {
    fn from(value: HttpVersion) -> Self {
        match value {
            HttpVersion::Http09 => Self::HTTP_09,
            HttpVersion::Http10 => Self::HTTP_10,
            HttpVersion::Http11 => Self::HTTP_11,
            HttpVersion::H2 => Self::HTTP_2,
            HttpVersion::H3 => Self::HTTP_3,
        }
    }
}

/// An HTTP response with an eagerly drained body
///
/// The body is fully materialized by the time a `Response` exists; decoding
/// is explicit through [`json`](Response::json)/[`text`](Response::text)
/// rather than any index-style sugar. Responses outlive the send that
/// produced them.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    version: HttpVersion,
    reason: Option<String>,
    debug: Option<Box<DebugInfo>>,
}

impl Response {
    /// Creates a response with the given status and an empty body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            version: HttpVersion::default(),
            reason: None,
            debug: None,
        }
    }

    /// Creates a response from a status code number
    pub fn from_status(status: u16) -> Result<Self> {
        Ok(Self::new(StatusCode::from_u16(status)?))
    }

    /// Sets the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Appends a header
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.headers.append(
            HeaderName::from_str(name)?,
            HeaderValue::from_str(value)?,
        );
        Ok(self)
    }

    /// Sets the HTTP version
    pub fn with_version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets the reason phrase
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// The status code
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first value of a header, when present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The drained body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body decoded as lossy UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON into a typed value
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decodes the body as a JSON document
    pub fn json_value(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Reads one top-level key out of a JSON body
    pub fn json_get(&self, key: &str) -> Option<Value> {
        self.json_value().ok()?.get(key).cloned()
    }

    /// The HTTP version
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// The reason phrase, falling back to the canonical one for the status
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    /// The debug record attached to this send, when debug was enabled
    pub fn debug_info(&self) -> Option<&DebugInfo> {
        self.debug.as_deref()
    }

    /// True for 1xx statuses
    pub fn is_informational(&self) -> bool {
        self.status.is_informational()
    }

    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// True for 3xx statuses
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    /// True for 4xx statuses
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// True for 5xx statuses
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    pub(crate) fn insert_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_str(name), HeaderValue::from_str(value))
        {
            self.headers.insert(name, value);
        }
    }

    pub(crate) fn append_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_str(name), HeaderValue::from_str(value))
        {
            self.headers.append(name, value);
        }
    }

    pub(crate) fn set_debug(&mut self, debug: DebugInfo) {
        self.debug = Some(Box::new(debug));
    }

    /// Adds an RFC 7234 warning header
    pub(crate) fn add_warning(&mut self, host: &str, code: u16, message: &str) {
        // warning-value = warn-code SP warn-agent SP warn-text [SP warn-date]
        let escaped = message.replace('"', "'").replace(['\n', '\r'], " ");
        let value = format!(
            "{} {} \"{}\" \"{}\"",
            code,
            host,
            escaped,
            httpdate::fmt_http_date(SystemTime::now())
        );
        if let Ok(value) = HeaderValue::from_str(&value) {
            if let Ok(name) = HeaderName::from_str(WARNING) {
                self.headers.append(name, value);
            }
        }
    }
}

/// Per-send diagnostics attached to a [`Response`] when debug is enabled
///
/// One record per response, never shared between concurrent sends.
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    /// Snapshot of the outgoing request
    pub request: DebugRequest,
    /// Summary of the response
    pub response: DebugResponse,
    /// Timing of the whole send, retries included
    pub performance: DebugTiming,
    /// Bytes materialized by the exchange
    pub memory: DebugMemory,
}

/// Request snapshot inside [`DebugInfo`]
#[derive(Debug, Clone, Serialize)]
pub struct DebugRequest {
    /// Request method
    pub method: String,
    /// Absolute request URL
    pub uri: String,
    /// Outgoing headers
    pub headers: HashMap<String, Vec<String>>,
    /// Rendered request options
    pub options: String,
}

/// Response summary inside [`DebugInfo`]
#[derive(Debug, Clone, Serialize)]
pub struct DebugResponse {
    /// Response status code
    pub status_code: u16,
    /// Response headers
    pub headers: HashMap<String, Vec<String>>,
    /// Drained body length in bytes
    pub content_length: usize,
}

/// Send timing inside [`DebugInfo`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DebugTiming {
    /// Total wall time in milliseconds
    pub total_time_ms: f64,
    /// Send start as seconds since the Unix epoch
    pub start_time: f64,
    /// Send end as seconds since the Unix epoch
    pub end_time: f64,
}

/// Memory accounting inside [`DebugInfo`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DebugMemory {
    /// Bytes materialized for the request and response bodies
    pub delta_bytes: u64,
}

pub(crate) fn url_host(url: &Url) -> String {
    url.host_str().map(str::to_string).unwrap_or_else(|| "unknown".into())
}
