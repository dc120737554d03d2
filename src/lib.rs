#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! An HTTP client orchestration layer.
//!
//! The wire transport is not the interesting part of an HTTP client; this
//! crate delegates it to an abstract [`Transport`] port and concentrates on
//! everything above it:
//!
//! - a fluent, immutable [`Request`] builder with a typed option catalog
//! - an RFC 7234 [cache](crate::cache) with conditional revalidation,
//!   stale-while-revalidate, and stale-if-error
//! - a [retry controller](crate::retry) with exponential backoff, jitter,
//!   and `Retry-After` support
//! - a priority-ordered [`MiddlewarePipeline`] wrapped around the transport
//! - a [`MockServer`] and [`Recorder`] for tests: pattern-matched fakes,
//!   response sequences, capture and replay
//! - [task combinators](crate::task) for fanning sends out concurrently
//!
//! One [`Client`] serves any number of concurrent sends without per-request
//! state bleeding between them.
//!
//! ## Quick start
//!
//! Requests answered by an attached [`MockServer`] never reach the
//! transport, which makes the whole pipeline testable offline:
//!
//! ```rust
//! use std::sync::Arc;
//! use fetch_http::{Client, MockResponse, MockServer, Request};
//! # use fetch_http::{Response, Transport, TransportError};
//! # struct NoNetwork;
//! # #[async_trait::async_trait]
//! # impl Transport for NoNetwork {
//! #     async fn send(&self, _: &Request) -> Result<Response, TransportError> {
//! #         Err(TransportError::Connect("no network here".into()))
//! #     }
//! # }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> fetch_http::Result<()> {
//! let mock = Arc::new(MockServer::new());
//! mock.fake(
//!     "GET https://api.example.com/users/*",
//!     MockResponse::new().json(serde_json::json!({ "name": "ada" })),
//! );
//!
//! let client = Client::builder(NoNetwork).mock(mock.clone()).build();
//! let response = client
//!     .send(Request::get("https://api.example.com/users/1"))
//!     .await?;
//!
//! assert_eq!(response.status(), 200);
//! assert_eq!(response.json_get("name").unwrap(), "ada");
//! mock.assert_sent("api.example.com/*");
//! # Ok(())
//! # }
//! ```
//!
//! ## Caching
//!
//! Enable caching by attaching an [`HttpCache`] over any
//! [`CacheStore`](crate::cache::CacheStore) backend. Cache outcomes are
//! observable through the `x-cache-status` response header
//! ([`XCACHESTATUS`]): `HIT`, `STALE`, `REVALIDATED`, or `STALE-IF-ERROR`.
//!
//! ```rust
//! use fetch_http::{CacheConfig, HttpCache, MemoryStore};
//!
//! let cache = HttpCache::with_config(
//!     MemoryStore::new(2048),
//!     CacheConfig { shared: false, ..Default::default() },
//! );
//! ```
//!
//! The bundled backends: [`MemoryStore`] (bounded, FIFO eviction),
//! [`FileStore`] (one file per entry, atomic writes; feature `store-file`,
//! on by default), and `MokaStore` (feature `store-moka`).
//!
//! ## Retries
//!
//! Network-class transport failures and retryable statuses (408, 429, and
//! the 5xx gateway family by default) re-enter the attempt loop with
//! exponential, jittered backoff; `Retry-After` headers are honored. A
//! response that is still a retryable status once the budget is spent is
//! returned, never raised: HTTP errors are values here, not exceptions.
//!
//! ## Features
//!
//! - `store-file` (default): enable [`FileStore`], the file-backed cache
//!   backend.
//! - `store-moka` (disabled): enable `MokaStore`, an in-memory backend over
//!   [moka](https://github.com/moka-rs/moka).

pub mod cache;
pub mod retry;
pub mod task;
pub mod uri;

mod client;
mod error;
mod headers;
mod middleware;
mod mock;
mod recorder;
mod request;
mod response;
mod transport;

#[cfg(test)]
mod test;

pub use cache::{
    CacheConfig, CacheKeyFn, CacheLookup, CacheStatus, CacheStore,
    CachedResponse, HttpCache, XCACHESTATUS,
};
pub use cache::store::MemoryStore;
#[cfg(feature = "store-file")]
#[cfg_attr(docsrs, doc(cfg(feature = "store-file")))]
pub use cache::store::FileStore;
#[cfg(feature = "store-moka")]
#[cfg_attr(docsrs, doc(cfg(feature = "store-moka")))]
pub use cache::store::MokaStore;
pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use headers::HeaderBag;
pub use middleware::{
    Handler, Middleware, MiddlewareEntry, MiddlewarePipeline, Next,
};
pub use mock::{MockResponder, MockResponse, MockResponseSequence, MockServer};
pub use recorder::{
    RecordedRequest, RecordedResponse, Recorder, Recording,
};
pub use request::{Body, CacheSettings, Part, Request, RequestOptions};
pub use response::{
    DebugInfo, DebugMemory, DebugRequest, DebugResponse, DebugTiming,
    HttpVersion, Response,
};
pub use retry::{RetryController, RetryPolicy};
pub use transport::{Transport, TransportError};

// Re-exported so downstream code can name the token type without depending
// on tokio-util directly.
pub use tokio_util::sync::CancellationToken;
