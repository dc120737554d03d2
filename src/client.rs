//! The request executor: mock short-circuit, cache, middleware, retry,
//! transport

use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use http::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::{CacheLookup, CachedResponse, HttpCache};
use crate::error::{Error, Result};
use crate::headers::HeaderBag;
use crate::middleware::{Handler, Middleware, MiddlewarePipeline};
use crate::mock::MockServer;
use crate::recorder::Recorder;
use crate::request::{Request, RequestOptions};
use crate::response::{
    DebugInfo, DebugMemory, DebugRequest, DebugResponse, DebugTiming,
    Response,
};
use crate::retry::{RetryController, RetryPolicy};
use crate::transport::{Transport, TransportError};

/// Builds a [`Client`]
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    pipeline: MiddlewarePipeline,
    cache: Option<HttpCache>,
    retry: RetryPolicy,
    mock: Option<Arc<MockServer>>,
    recorder: Option<Arc<Recorder>>,
    defaults: RequestOptions,
    base_url: Option<Url>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("pipeline", &self.pipeline)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            pipeline: MiddlewarePipeline::new(),
            cache: None,
            retry: RetryPolicy::default(),
            mock: None,
            recorder: None,
            defaults: RequestOptions::default(),
            base_url: None,
        }
    }

    /// Sets the base URL relative request targets resolve against
    pub fn base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    /// Adds a middleware at priority `0`
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.pipeline = self.pipeline.with(middleware);
        self
    }

    /// Adds a middleware at an explicit priority; higher runs first
    pub fn middleware_with_priority(
        mut self,
        middleware: impl Middleware,
        priority: i32,
    ) -> Self {
        self.pipeline = self.pipeline.with_priority(middleware, priority);
        self
    }

    /// Replaces the whole middleware pipeline
    pub fn pipeline(mut self, pipeline: MiddlewarePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Enables response caching through the given cache
    pub fn cache(mut self, cache: HttpCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the client-wide retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Attaches a mock server; matched requests never reach the transport
    pub fn mock(mut self, mock: Arc<MockServer>) -> Self {
        self.mock = Some(mock);
        self
    }

    /// Attaches a recorder capturing every exchange while it is active
    pub fn recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Sets the default request options, merged under per-request ones
    pub fn default_options(mut self, options: RequestOptions) -> Self {
        self.defaults = options;
        self
    }

    /// Builds the client
    pub fn build(self) -> Client {
        Client {
            transport: self.transport,
            pipeline: self.pipeline,
            cache: self.cache,
            retry: self.retry,
            mock: self.mock,
            recorder: self.recorder,
            defaults: self.defaults,
            base_url: self.base_url,
        }
    }
}

/// The top-level request executor
///
/// One client serves any number of in-flight requests: `send` never mutates
/// client state, and per-request options are merged into a private copy, so
/// concurrent sends cannot observe each other's timeouts, retry budgets, or
/// debug records. Cloning is cheap (the transport and collaborators are
/// shared).
///
/// ```rust,no_run
/// use fetch_http::{Client, Request, Transport, TransportError, Response, HttpCache, MemoryStore};
///
/// # struct Engine;
/// # #[async_trait::async_trait]
/// # impl Transport for Engine {
/// #     async fn send(&self, _: &Request) -> Result<Response, TransportError> {
/// #         Err(TransportError::Timeout)
/// #     }
/// # }
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> fetch_http::Result<()> {
/// let client = Client::builder(Engine)
///     .cache(HttpCache::new(MemoryStore::new(512)))
///     .build();
/// let response = client
///     .send(Request::get("https://api.example.com/items").cache_ttl(60))
///     .await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    pipeline: MiddlewarePipeline,
    cache: Option<HttpCache>,
    retry: RetryPolicy,
    mock: Option<Arc<MockServer>>,
    recorder: Option<Arc<Recorder>>,
    defaults: RequestOptions,
    base_url: Option<Url>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pipeline", &self.pipeline)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Starts building a client over the given transport
    pub fn builder(transport: impl Transport) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Creates a client over the given transport with defaults everywhere
    pub fn new(transport: impl Transport) -> Self {
        ClientBuilder::new(transport).build()
    }

    /// The client-wide default request options
    pub fn defaults(&self) -> &RequestOptions {
        &self.defaults
    }

    /// The client-wide retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The middleware pipeline
    pub fn pipeline(&self) -> &MiddlewarePipeline {
        &self.pipeline
    }

    /// The response cache, when configured
    pub fn cache(&self) -> Option<&HttpCache> {
        self.cache.as_ref()
    }

    /// The attached mock server, when configured
    pub fn mock(&self) -> Option<&Arc<MockServer>> {
        self.mock.as_ref()
    }

    /// The attached recorder, when configured
    pub fn recorder(&self) -> Option<&Arc<Recorder>> {
        self.recorder.as_ref()
    }

    /// Performs one send
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.send_with_token(request, CancellationToken::new()).await
    }

    /// Performs one send under a cancellation token
    ///
    /// Cancellation aborts between retry attempts (and drops an in-flight
    /// attempt) and resolves the send with
    /// [`Error::Cancelled`](crate::Error::Cancelled).
    pub async fn send_with_token(
        &self,
        request: Request,
        token: CancellationToken,
    ) -> Result<Response> {
        let start_system = SystemTime::now();
        let started = Instant::now();

        let mut request = request.resolve(self.base_url.as_ref())?;
        let mut effective = request.options().merge_over(&self.defaults);
        if effective.connect_timeout.is_none() {
            effective.connect_timeout = effective.timeout;
        }
        let debug_enabled = effective.debug;
        *request.options_mut() = effective;

        if let Some(mock) = &self.mock {
            if let Some(response) = mock.intercept(&request).await? {
                return Ok(self.finish(
                    &request,
                    response,
                    started,
                    start_system,
                    debug_enabled,
                    true,
                ));
            }
        }

        let mut cache_key: Option<String> = None;
        let mut kept: Option<CachedResponse> = None;
        if !request.options().detached {
            if let Some(cache) = &self.cache {
                match cache.lookup(&request).await? {
                    CacheLookup::Bypass => {}
                    CacheLookup::Hit { response } => {
                        return Ok(self.finish(
                            &request,
                            response,
                            started,
                            start_system,
                            debug_enabled,
                            false,
                        ));
                    }
                    CacheLookup::Stale { key: _, response } => {
                        self.spawn_revalidation(&request);
                        return Ok(self.finish(
                            &request,
                            response,
                            started,
                            start_system,
                            debug_enabled,
                            false,
                        ));
                    }
                    CacheLookup::Miss { key }
                    | CacheLookup::Refresh { key } => {
                        cache_key = Some(key);
                    }
                    CacheLookup::Revalidate { key, cached }
                    | CacheLookup::Expired { key, cached } => {
                        HttpCache::add_conditional_headers(
                            &mut request,
                            &cached,
                        );
                        cache_key = Some(key);
                        kept = Some(cached);
                    }
                }
            }
        }

        let core = SendCore {
            transport: self.transport.clone(),
            policy: self.retry_policy_for(request.options()),
            token,
        };
        let outcome = match request.options().timeout {
            Some(deadline) => {
                match tokio::time::timeout(
                    deadline,
                    self.pipeline.handle(request.clone(), &core),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Transport {
                        source: TransportError::Timeout,
                        method: request.method().to_string(),
                        url: request_url(&request),
                        attempts: 0,
                        elapsed_ms: deadline.as_millis() as u64,
                    }),
                }
            }
            None => self.pipeline.handle(request.clone(), &core).await,
        };

        match outcome {
            Ok(response) => {
                let response = if response.status()
                    == http::StatusCode::NOT_MODIFIED
                {
                    match (&self.cache, cache_key.as_deref(), kept.take()) {
                        (Some(cache), Some(key), Some(cached)) => {
                            cache
                                .merge_not_modified(
                                    key, cached, &request, &response,
                                )
                                .await?
                        }
                        _ => response,
                    }
                } else {
                    if let (Some(cache), Some(key)) =
                        (&self.cache, cache_key.as_deref())
                    {
                        cache.store_response(key, &request, &response).await?;
                    }
                    response
                };
                if !request.options().detached {
                    if let Some(cache) = &self.cache {
                        let method = request.method();
                        if method != Method::GET
                            && method != Method::HEAD
                            && (response.is_success() || response.is_redirect())
                        {
                            cache.invalidate_unsafe(&request).await;
                        }
                    }
                }
                Ok(self.finish(
                    &request,
                    response,
                    started,
                    start_system,
                    debug_enabled,
                    false,
                ))
            }
            Err(error) => {
                if error.network_failure().is_some() {
                    if let (Some(cache), Some(cached)) =
                        (&self.cache, kept.as_ref())
                    {
                        if let Some(response) = cache
                            .serve_stale_on_error(&request, cached)
                            .await?
                        {
                            return Ok(self.finish(
                                &request,
                                response,
                                started,
                                start_system,
                                debug_enabled,
                                false,
                            ));
                        }
                    }
                }
                Err(error)
            }
        }
    }

    /// Performs the send in a spawned task, bypassing the cache
    ///
    /// The terminal error, if any, is wrapped in
    /// [`Error::Async`](crate::Error::Async) with the original as cause.
    pub fn send_async(
        &self,
        request: Request,
    ) -> tokio::task::JoinHandle<Result<Response>> {
        self.send_async_with_token(request, CancellationToken::new())
    }

    /// [`send_async`](Client::send_async) under a cancellation token
    pub fn send_async_with_token(
        &self,
        request: Request,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<Response>> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut request = request;
            request.options_mut().detached = true;
            client
                .send_with_token(request, token)
                .await
                .map_err(|error| Error::Async(Box::new(error)))
        })
    }

    fn retry_policy_for(&self, options: &RequestOptions) -> RetryPolicy {
        let mut policy = self.retry.clone();
        if let Some(retries) = options.retries {
            policy.max_retries = retries;
        }
        if let Some(base_delay) = options.retry_delay {
            policy.base_delay = base_delay;
        }
        policy
    }

    fn spawn_revalidation(&self, request: &Request) {
        let client = self.clone();
        let mut request = request.clone().force_refresh();
        request.options_mut().debug = false;
        tokio::spawn(async move {
            if let Err(err) = client.send(request).await {
                log::debug!("background revalidation failed: {err}");
            }
        });
    }

    fn finish(
        &self,
        request: &Request,
        mut response: Response,
        started: Instant,
        start_system: SystemTime,
        debug_enabled: bool,
        via_mock: bool,
    ) -> Response {
        if !via_mock {
            if let Some(mock) = &self.mock {
                mock.note_passthrough(request, &response);
            }
        }
        if let Some(recorder) = &self.recorder {
            recorder.capture(request, &response);
        }
        if debug_enabled {
            response.set_debug(build_debug_info(
                request,
                &response,
                started,
                start_system,
            ));
        }
        response
    }
}

struct SendCore {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    token: CancellationToken,
}

#[async_trait::async_trait]
impl Handler for SendCore {
    async fn call(&self, request: Request) -> Result<Response> {
        let controller = RetryController::new(self.policy.clone());
        let started = Instant::now();
        let transport = self.transport.clone();
        let (result, attempts) = controller
            .execute(&self.token, |_attempt| {
                let transport = transport.clone();
                let request = request.clone();
                async move { transport.send(&request).await }
            })
            .await;
        match result {
            Ok(response) => Ok(response),
            Err(TransportError::Cancelled) => Err(Error::Cancelled),
            Err(source) => Err(Error::Transport {
                source,
                method: request.method().to_string(),
                url: request_url(&request),
                attempts,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

fn request_url(request: &Request) -> String {
    match request.url() {
        Some(url) => url.to_string(),
        None => request.target().to_string(),
    }
}

fn build_debug_info(
    request: &Request,
    response: &Response,
    started: Instant,
    start_system: SystemTime,
) -> DebugInfo {
    let request_bytes = request
        .body()
        .encode()
        .ok()
        .flatten()
        .map(|(_, bytes)| bytes.len())
        .unwrap_or(0);
    DebugInfo {
        request: DebugRequest {
            method: request.method().to_string(),
            uri: request_url(request),
            headers: HeaderBag::from(request.headers()).into(),
            options: format!("{:?}", request.options()),
        },
        response: DebugResponse {
            status_code: response.status().as_u16(),
            headers: HeaderBag::from(response.headers()).into(),
            content_length: response.body().len(),
        },
        performance: DebugTiming {
            total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            start_time: epoch_seconds(start_system),
            end_time: epoch_seconds(SystemTime::now()),
        },
        memory: DebugMemory {
            delta_bytes: (request_bytes + response.body().len()) as u64,
        },
    }
}

fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
