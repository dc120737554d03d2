//! The transport port: the seam between request orchestration and the wire

use thiserror::Error;

use crate::request::Request;
use crate::response::Response;

/// An abstract HTTP engine
///
/// The orchestration layer never touches sockets itself; it hands a fully
/// resolved [`Request`] to a `Transport` and receives either a drained
/// [`Response`] or a tagged [`TransportError`]. Connection pooling, TLS, and
/// protocol negotiation all live behind this trait. Per-request transport
/// concerns (proxy, redirect policy, connect timeout, TLS material, extras)
/// travel inside [`Request::options`](crate::RequestOptions).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Performs one HTTP exchange
    async fn send(
        &self,
        request: &Request,
    ) -> Result<Response, TransportError>;
}

/// A tagged transport failure
///
/// The tag determines retryability: [`Connect`](TransportError::Connect),
/// [`Timeout`](TransportError::Timeout) and [`Read`](TransportError::Read)
/// form the network class and are always retryable; the rest propagate
/// immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection establishment failed, including DNS resolution
    #[error("connection failed: {0}")]
    Connect(String),
    /// The connect or read deadline elapsed
    #[error("request timed out")]
    Timeout,
    /// The connection was reset or the body could not be read
    #[error("read failed: {0}")]
    Read(String),
    /// TLS negotiation or certificate validation failed
    #[error("tls failure: {0}")]
    Tls(String),
    /// The peer violated the HTTP protocol
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The in-flight request was cancelled
    #[error("request cancelled")]
    Cancelled,
    /// Anything the transport cannot classify
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// True for the network class: connect/DNS failures, timeouts, and
    /// read/write resets
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_)
                | TransportError::Timeout
                | TransportError::Read(_)
        )
    }
}
