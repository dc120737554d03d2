//! The priority-ordered middleware pipeline wrapped around the transport

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// Intercepts requests and responses around the transport
///
/// A middleware may rewrite the request before calling `next`, rewrite the
/// returned response, short-circuit by answering without calling `next`, or
/// wrap errors on the way out.
///
/// ```rust
/// use fetch_http::{Middleware, Next, Request, Response, Result};
///
/// struct UserAgent(&'static str);
///
/// #[async_trait::async_trait]
/// impl Middleware for UserAgent {
///     async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
///         next.run(request.header("user-agent", self.0)).await
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Handles the request, usually delegating to `next`
    async fn handle(&self, request: Request, next: Next<'_>)
        -> Result<Response>;
}

/// The innermost handler a pipeline folds onto: retry-wrapped transport in
/// production, anything at all in tests
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Performs the exchange the pipeline wraps
    async fn call(&self, request: Request) -> Result<Response>;
}

/// The remainder of the chain, handed to each middleware
///
/// Calling [`run`](Next::run) invokes the next middleware in priority
/// order, or the core handler when the chain is exhausted.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stack: &'a [MiddlewareEntry],
    core: &'a dyn Handler,
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("remaining", &self.stack.len()).finish()
    }
}

impl Next<'_> {
    /// Invokes the rest of the chain
    pub async fn run(self, request: Request) -> Result<Response> {
        match self.stack.split_first() {
            Some((entry, rest)) => {
                entry
                    .middleware
                    .handle(request, Next { stack: rest, core: self.core })
                    .await
            }
            None => self.core.call(request).await,
        }
    }
}

/// One registered middleware with its ordering
#[derive(Clone)]
pub struct MiddlewareEntry {
    middleware: Arc<dyn Middleware>,
    /// Higher runs first (outermost)
    priority: i32,
    /// Registration order, breaking priority ties
    seq: usize,
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// An immutable, priority-sorted middleware chain
///
/// Builder methods return a new pipeline; a pipeline in use never changes.
/// Entries run highest-priority first, ties broken by insertion order. An
/// empty pipeline is a direct call to the core handler.
#[derive(Debug, Clone, Default)]
pub struct MiddlewarePipeline {
    entries: Vec<MiddlewareEntry>,
    next_seq: usize,
}

impl MiddlewarePipeline {
    /// Creates an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a pipeline with the middleware added at priority `0`
    pub fn with(self, middleware: impl Middleware) -> Self {
        self.with_priority(middleware, 0)
    }

    /// Returns a pipeline with the middleware added at an explicit priority
    pub fn with_priority(
        mut self,
        middleware: impl Middleware,
        priority: i32,
    ) -> Self {
        let entry = MiddlewareEntry {
            middleware: Arc::new(middleware),
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let at = self
            .entries
            .iter()
            .position(|existing| {
                (existing.priority, std::cmp::Reverse(existing.seq))
                    < (entry.priority, std::cmp::Reverse(entry.seq))
            })
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
        self
    }

    /// Returns a pipeline with the middleware placed outermost: its
    /// priority is the current maximum plus one
    pub fn prepend(self, middleware: impl Middleware) -> Self {
        let priority = self
            .entries
            .iter()
            .map(|entry| entry.priority)
            .max()
            .map_or(0, |max| max + 1);
        self.with_priority(middleware, priority)
    }

    /// Number of registered middlewares
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no middleware is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the chain around the given core handler
    pub async fn handle(
        &self,
        request: Request,
        core: &dyn Handler,
    ) -> Result<Response> {
        Next { stack: &self.entries, core }.run(request).await
    }
}
