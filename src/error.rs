use miette::Diagnostic;
use thiserror::Error;

use crate::transport::TransportError;

/// A `Result` typedef to use with the [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for request orchestration
///
/// HTTP 4xx/5xx responses are not errors: they are returned as ordinary
/// [`Response`](crate::Response) values. Only transport failures, invalid
/// input, cancellation, and test-harness misuse surface here.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// The builder received a bad URI, an unsupported method, or an invalid
    /// option combination
    #[error("invalid input: {0}")]
    #[diagnostic(code(fetch_http::invalid_input))]
    InvalidInput(String),
    /// The transport failed after the retry budget was spent, annotated with
    /// the request context
    #[error("{source} (method={method} url={url} attempts={attempts} elapsed={elapsed_ms}ms)")]
    #[diagnostic(code(fetch_http::transport))]
    Transport {
        /// The terminal transport failure
        source: TransportError,
        /// Request method
        method: String,
        /// Request URL
        url: String,
        /// How many times the transport was invoked
        attempts: u32,
        /// Wall time spent across all attempts
        elapsed_ms: u64,
    },
    /// A request reached the mock server while stray requests are prevented
    /// and no fake response matched
    #[error("no fake response registered for {method} {url}")]
    #[diagnostic(code(fetch_http::no_fake_response))]
    NoFakeResponseRegistered {
        /// Request method
        method: String,
        /// Request URL
        url: String,
    },
    /// A mock response sequence was drained with no `when_empty` default
    #[error("mock response sequence exhausted")]
    #[diagnostic(code(fetch_http::mock_sequence_exhausted))]
    MockSequenceExhausted,
    /// The cache backend failed, most commonly file I/O in the file store
    #[error("cache backend error: {reason}")]
    #[diagnostic(code(fetch_http::cache_backend))]
    CacheBackend {
        /// Backend-reported failure detail
        reason: String,
    },
    /// The cancellation token fired before the request settled
    #[error("request cancelled")]
    #[diagnostic(code(fetch_http::cancelled))]
    Cancelled,
    /// A detached send failed; the original error is the cause
    #[error("async request failed")]
    #[diagnostic(code(fetch_http::async_failure))]
    Async(#[source] Box<Error>),
    /// Decoding a response body (or recording payload) failed
    #[error(transparent)]
    #[diagnostic(code(fetch_http::decode))]
    Decode(#[from] serde_json::Error),
    /// There was an error parsing a URL
    #[error(transparent)]
    #[diagnostic(code(fetch_http::invalid_url))]
    InvalidUrl(#[from] url::ParseError),
    /// Error from http
    #[error(transparent)]
    #[diagnostic(code(fetch_http::http))]
    Http(#[from] http::Error),
    /// There was an error converting a header to a string
    #[error(transparent)]
    #[diagnostic(code(fetch_http::header_to_str))]
    HeaderToStr(#[from] http::header::ToStrError),
    /// There was an error parsing an HTTP header value
    #[error(transparent)]
    #[diagnostic(code(fetch_http::invalid_header_value))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// There was an error parsing an HTTP header name
    #[error(transparent)]
    #[diagnostic(code(fetch_http::invalid_header_name))]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// There was an error parsing an HTTP method
    #[error(transparent)]
    #[diagnostic(code(fetch_http::invalid_method))]
    InvalidMethod(#[from] http::method::InvalidMethod),
    /// There was an error parsing an HTTP status code
    #[error(transparent)]
    #[diagnostic(code(fetch_http::invalid_status_code))]
    InvalidStatusCode(#[from] http::status::InvalidStatusCode),
    /// A general error used as a catch all for other errors via anyhow
    #[error(transparent)]
    #[diagnostic(code(fetch_http::general))]
    General(#[from] anyhow::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::CacheBackend { reason: err.to_string() }
    }
}

impl Error {
    /// Returns the network-class transport failure behind this error, if any.
    ///
    /// Only network-class failures qualify for stale-if-error fallback.
    pub fn network_failure(&self) -> Option<&TransportError> {
        match self {
            Error::Transport { source, .. } if source.is_network() => {
                Some(source)
            }
            _ => None,
        }
    }
}
