use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::cache::control::{self, CacheControl};
use crate::cache::store::MemoryStore;
use crate::cache::{key, CacheConfig, CacheStore, CachedResponse};
use crate::error::{Error, Result};
use crate::headers::HeaderBag;
use crate::middleware::{Handler, Middleware, MiddlewarePipeline, Next};
use crate::mock::{MockResponse, MockResponseSequence, MockServer};
use crate::recorder::Recorder;
use crate::request::{Body, CacheSettings, Part, Request};
use crate::response::{HttpVersion, Response};
use crate::retry::{
    classify, retry_after, Outcome, RetryController, RetryPolicy, RetrySignal,
};
use crate::transport::TransportError;
use crate::{task, uri};

use tokio_util::sync::CancellationToken;

const TEST_BODY: &[u8] = b"test";

// ---------------------------------------------------------------- uri

#[test]
fn resolve_joins_with_single_slash() -> Result<()> {
    let base = Url::parse("https://api.example.com/v1/")?;
    let resolved = uri::resolve(Some(&base), "users", &[])?;
    assert_eq!(resolved.as_str(), "https://api.example.com/v1/users");
    let resolved = uri::resolve(Some(&base), "/users", &[])?;
    assert_eq!(resolved.as_str(), "https://api.example.com/v1/users");
    Ok(())
}

#[test]
fn resolve_absolute_target_ignores_base() -> Result<()> {
    let base = Url::parse("https://api.example.com/v1/")?;
    let resolved = uri::resolve(Some(&base), "https://other.example.com/x", &[])?;
    assert_eq!(resolved.host_str(), Some("other.example.com"));
    Ok(())
}

#[test]
fn resolve_relative_without_base_fails() {
    let result = uri::resolve(None, "users/1", &[]);
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
fn resolve_merges_query_with_user_override() -> Result<()> {
    let url = uri::resolve(
        None,
        "https://api.example.com/items?a=1&b=2",
        &[("a".into(), "9".into())],
    )?;
    assert_eq!(url.query(), Some("b=2&a=9"));
    Ok(())
}

#[test]
fn normalize_is_idempotent_and_order_independent() -> Result<()> {
    let first = uri::normalize(&Url::parse(
        "HTTP://EXAMPLE.com:80/path?b=2&a=1#frag",
    )?);
    let second = uri::normalize(&Url::parse("http://example.com/path?a=1&b=2")?);
    assert_eq!(first, second);
    assert_eq!(uri::normalize(&first), first);
    assert_eq!(first.fragment(), None);
    Ok(())
}

#[test]
fn normalize_elides_default_ports() -> Result<()> {
    let with_port = uri::normalize(&Url::parse("http://x:80/")?);
    let without = uri::normalize(&Url::parse("http://x/")?);
    assert_eq!(with_port, without);
    let tls = uri::normalize(&Url::parse("https://x:443/")?);
    assert_eq!(tls.as_str(), "https://x/");
    Ok(())
}

// ---------------------------------------------------------------- keys

#[test]
fn cache_key_is_order_independent() -> Result<()> {
    let config = CacheConfig::default();
    let first = Request::get("https://api.example.com/items?b=2&a=1")
        .header("accept", "application/json")
        .resolve(None)?;
    let second = Request::get("https://API.example.com/items?a=1&b=2")
        .header("accept", "application/json")
        .resolve(None)?;
    assert_eq!(key::generate(&first, &config)?, key::generate(&second, &config)?);
    Ok(())
}

#[test]
fn cache_key_varies_on_vary_headers() -> Result<()> {
    let config = CacheConfig::default();
    let json = Request::get("https://api.example.com/items")
        .header("accept", "application/json")
        .resolve(None)?;
    let xml = Request::get("https://api.example.com/items")
        .header("accept", "application/xml")
        .resolve(None)?;
    assert_ne!(key::generate(&json, &config)?, key::generate(&xml, &config)?);
    Ok(())
}

#[test]
fn cache_key_ignores_non_vary_headers() -> Result<()> {
    let config = CacheConfig::default();
    let plain = Request::get("https://api.example.com/items").resolve(None)?;
    let tagged = Request::get("https://api.example.com/items")
        .header("x-request-id", "123")
        .resolve(None)?;
    assert_eq!(key::generate(&plain, &config)?, key::generate(&tagged, &config)?);
    Ok(())
}

#[test]
fn cache_key_custom_override_skips_normalization() -> Result<()> {
    let config = CacheConfig::default();
    let request = Request::get("https://api.example.com/items")
        .cache(CacheSettings { key: Some("mine".into()), ..Default::default() })
        .resolve(None)?;
    assert_eq!(key::generate(&request, &config)?, "fetch-http:mine");
    Ok(())
}

#[test]
fn cache_key_body_hash_only_when_requested() -> Result<()> {
    let config = CacheConfig::default();
    let settings =
        CacheSettings { cache_body: true, ..Default::default() };
    let first = Request::post("https://api.example.com/search")
        .json(&serde_json::json!({ "q": "a" }))
        .cache(settings.clone())
        .resolve(None)?;
    let second = Request::post("https://api.example.com/search")
        .json(&serde_json::json!({ "q": "b" }))
        .cache(settings)
        .resolve(None)?;
    assert_ne!(key::generate(&first, &config)?, key::generate(&second, &config)?);

    let ignored_first = Request::post("https://api.example.com/search")
        .json(&serde_json::json!({ "q": "a" }))
        .resolve(None)?;
    let ignored_second = Request::post("https://api.example.com/search")
        .json(&serde_json::json!({ "q": "b" }))
        .resolve(None)?;
    assert_eq!(
        key::generate(&ignored_first, &config)?,
        key::generate(&ignored_second, &config)?
    );
    Ok(())
}

#[test]
fn cache_key_is_deterministic() -> Result<()> {
    let config = CacheConfig::default();
    let request = Request::get("https://api.example.com/items?x=1")
        .header("accept", "text/plain")
        .resolve(None)?;
    assert_eq!(key::generate(&request, &config)?, key::generate(&request, &config)?);
    Ok(())
}

// ---------------------------------------------------------------- cache control

#[test]
fn cache_control_parses_directives() {
    let control = CacheControl::parse("No-Store, max-age=\"60\", private");
    assert!(control.no_store());
    assert!(control.private());
    assert_eq!(control.max_age(), Some(60));
    assert!(!control.no_cache());
    assert_eq!(control.stale_while_revalidate(), None);
}

#[test]
fn should_cache_respects_directives_and_status() {
    let none = CacheControl::default();
    assert!(control::should_cache(200, &none, false));
    assert!(!control::should_cache(500, &none, false));
    assert!(!control::should_cache(200, &CacheControl::parse("no-store"), false));
    let private = CacheControl::parse("private");
    assert!(control::should_cache(200, &private, false));
    assert!(!control::should_cache(200, &private, true));
}

#[test]
fn ttl_prefers_smaxage_for_shared_caches() -> Result<()> {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CACHE_CONTROL,
        "max-age=60, s-maxage=120".parse()?,
    );
    let now = SystemTime::now();
    assert_eq!(control::ttl_from_headers(&headers, true, now), Some(120));
    assert_eq!(control::ttl_from_headers(&headers, false, now), Some(60));
    Ok(())
}

#[test]
fn ttl_falls_back_to_expires() -> Result<()> {
    let now = SystemTime::now();
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::EXPIRES,
        httpdate::fmt_http_date(now + Duration::from_secs(120)).parse()?,
    );
    let ttl = control::ttl_from_headers(&headers, false, now)
        .expect("expires should produce a ttl");
    assert!((119..=120).contains(&ttl));

    let mut stale = HeaderMap::new();
    stale.insert(
        http::header::EXPIRES,
        httpdate::fmt_http_date(now - Duration::from_secs(60)).parse()?,
    );
    assert_eq!(control::ttl_from_headers(&stale, false, now), Some(0));
    Ok(())
}

// ---------------------------------------------------------------- cached response

fn cached(created: SystemTime, expires: Option<SystemTime>) -> CachedResponse {
    CachedResponse {
        status: 200,
        headers: HeaderBag::new(),
        body: TEST_BODY.to_vec(),
        created_at: created,
        expires_at: expires,
        etag: None,
        last_modified: None,
        metadata: None,
    }
}

#[test]
fn freshness_follows_expiry() {
    let now = SystemTime::now();
    let fresh = cached(now, Some(now + Duration::from_secs(60)));
    assert!(fresh.is_fresh(now));
    let expired = cached(now - Duration::from_secs(120), Some(now - Duration::from_secs(60)));
    assert!(!expired.is_fresh(now));
    assert!(expired.usable_as_stale(Duration::from_secs(120), now));
    assert!(!expired.usable_as_stale(Duration::from_secs(30), now));
    let forever = cached(now, None);
    assert!(forever.is_fresh(now + Duration::from_secs(86400)));
}

// ---------------------------------------------------------------- memory store

#[tokio::test]
async fn memory_store_round_trips() -> Result<()> {
    let store = MemoryStore::new(16);
    let now = SystemTime::now();
    store.set("k", cached(now, None), Some(60)).await?;
    let entry = store.get("k").await?.expect("entry should be present");
    assert_eq!(entry.body, TEST_BODY);
    assert!(store.has("k").await?);
    assert!(store.delete("k").await?);
    assert!(!store.delete("k").await?);
    Ok(())
}

#[tokio::test]
async fn memory_store_evicts_oldest_insertion() -> Result<()> {
    let store = MemoryStore::new(2);
    let now = SystemTime::now();
    store.set("first", cached(now, None), Some(0)).await?;
    std::thread::sleep(Duration::from_millis(2));
    store.set("second", cached(now, None), Some(0)).await?;
    std::thread::sleep(Duration::from_millis(2));
    store.set("third", cached(now, None), Some(0)).await?;
    assert!(store.get("first").await?.is_none());
    assert!(store.get("second").await?.is_some());
    assert!(store.get("third").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn memory_store_with_zero_capacity_retains_nothing() -> Result<()> {
    let store = MemoryStore::new(0);
    store.set("k", cached(SystemTime::now(), None), Some(60)).await?;
    assert!(store.get("k").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn memory_store_expires_lazily_and_prunes() -> Result<()> {
    let store = MemoryStore::new(16);
    let now = SystemTime::now();
    store.set("negative", cached(now, None), Some(-5)).await?;
    store.set("live", cached(now, None), Some(0)).await?;
    store.set("doomed", cached(now, None), Some(-1)).await?;
    assert!(store.get("negative").await?.is_none());
    assert!(!store.has("doomed").await?);
    store.set("negative", cached(now, None), Some(-5)).await?;
    store.set("doomed", cached(now, None), Some(-1)).await?;
    assert_eq!(store.prune().await?, 2);
    assert!(store.get("live").await?.is_some());
    store.clear().await?;
    assert!(store.is_empty());
    Ok(())
}

// ---------------------------------------------------------------- file store

#[cfg(feature = "store-file")]
mod file_store {
    use super::*;
    use crate::cache::store::FileStore;

    #[tokio::test]
    async fn file_store_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path())?;
        let now = SystemTime::now();
        store.set("k", cached(now, None), Some(60)).await?;
        let entry = store.get("k").await?.expect("entry should be present");
        assert_eq!(entry.status, 200);
        assert!(store.has("k").await?);
        assert!(store.delete("k").await?);
        assert!(!store.delete("k").await?);
        Ok(())
    }

    #[tokio::test]
    async fn file_store_drops_undecodable_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path())?;
        std::fs::write(dir.path().join("junk.cache"), b"not postcard")?;
        assert_eq!(store.prune().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn file_store_prunes_expired_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path())?;
        let now = SystemTime::now();
        store.set("dead", cached(now, None), Some(-1)).await?;
        store.set("alive", cached(now, None), Some(0)).await?;
        assert_eq!(store.prune().await?, 1);
        assert!(store.get("alive").await?.is_some());
        store.clear().await?;
        assert!(store.get("alive").await?.is_none());
        Ok(())
    }
}

// ---------------------------------------------------------------- retry

#[test]
fn backoff_is_exponential_without_jitter() {
    let policy = RetryPolicy {
        jitter: 0.0,
        base_delay: Duration::from_millis(100),
        ..Default::default()
    };
    assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(400));
}

#[test]
fn backoff_jitter_stays_in_band_and_floors_at_one_ms() {
    let policy = RetryPolicy {
        jitter: 0.5,
        base_delay: Duration::from_millis(100),
        ..Default::default()
    };
    for _ in 0..100 {
        let delay = policy.delay_for(1);
        assert!(delay >= Duration::from_millis(50), "{delay:?}");
        assert!(delay <= Duration::from_millis(150), "{delay:?}");
    }
    let tiny = RetryPolicy {
        jitter: 0.0,
        base_delay: Duration::from_micros(10),
        ..Default::default()
    };
    assert_eq!(tiny.delay_for(1), Duration::from_millis(1));
}

#[test]
fn classification_follows_policy() -> Result<()> {
    let policy = RetryPolicy::default();
    assert!(matches!(
        classify(&policy, Ok(Response::from_status(503)?)),
        Outcome::Retry(RetrySignal::Status(_))
    ));
    assert!(matches!(
        classify(&policy, Ok(Response::from_status(404)?)),
        Outcome::Ok(_)
    ));
    assert!(matches!(
        classify(&policy, Err(TransportError::Connect("refused".into()))),
        Outcome::Retry(RetrySignal::Transport(_))
    ));
    assert!(matches!(
        classify(&policy, Err(TransportError::Tls("bad cert".into()))),
        Outcome::Fatal(_)
    ));
    Ok(())
}

#[test]
fn retry_after_parses_seconds_and_dates() -> Result<()> {
    let seconds = Response::from_status(429)?.with_header("retry-after", "3")?;
    assert_eq!(retry_after(&seconds), Some(Duration::from_secs(3)));
    let past = Response::from_status(429)?.with_header(
        "retry-after",
        &httpdate::fmt_http_date(SystemTime::now() - Duration::from_secs(60)),
    )?;
    assert_eq!(retry_after(&past), Some(Duration::ZERO));
    assert_eq!(retry_after(&Response::from_status(429)?), None);
    Ok(())
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        jitter: 0.0,
        ..Default::default()
    }
}

#[tokio::test]
async fn retry_exhaustion_returns_final_status_response() -> Result<()> {
    let calls = AtomicUsize::new(0);
    let controller = RetryController::new(fast_policy(2));
    let (result, attempts) = controller
        .execute(&CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Response::from_status(503).map_err(|_| TransportError::Timeout) }
        })
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(attempts, 3);
    assert_eq!(result.expect("final response is returned").status(), 503);
    Ok(())
}

#[tokio::test]
async fn zero_retries_invokes_transport_once() {
    let calls = AtomicUsize::new(0);
    let controller = RetryController::new(fast_policy(0));
    let (result, attempts) = controller
        .execute(&CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Connect("refused".into())) }
        })
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(attempts, 1);
    assert!(matches!(result, Err(TransportError::Connect(_))));
}

#[tokio::test]
async fn retry_recovers_after_retryable_status() -> Result<()> {
    let calls = AtomicUsize::new(0);
    let controller = RetryController::new(fast_policy(3));
    let (result, attempts) = controller
        .execute(&CancellationToken::new(), |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let status = if call < 2 { 503 } else { 200 };
                Response::from_status(status)
                    .map_err(|_| TransportError::Timeout)
            }
        })
        .await;
    assert_eq!(attempts, 3);
    assert_eq!(result.expect("should settle").status(), 200);
    Ok(())
}

#[tokio::test]
async fn cancelled_token_short_circuits() {
    let token = CancellationToken::new();
    token.cancel();
    let controller = RetryController::new(fast_policy(3));
    let (result, attempts) = controller
        .execute(&token, |_| async {
            Err(TransportError::Connect("unreachable".into()))
        })
        .await;
    assert_eq!(attempts, 0);
    assert!(matches!(result, Err(TransportError::Cancelled)));
}

// ---------------------------------------------------------------- middleware

struct Trace {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Middleware for Trace {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        self.log.lock().unwrap().push(format!("{}:before", self.label));
        let response = next.run(request).await;
        self.log.lock().unwrap().push(format!("{}:after", self.label));
        response
    }
}

struct CountingCore {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Handler for CountingCore {
    async fn call(&self, _request: Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Response::from_status(200)
    }
}

#[tokio::test]
async fn middleware_runs_in_priority_order() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = MiddlewarePipeline::new()
        .with_priority(Trace { label: "low", log: log.clone() }, 1)
        .with_priority(Trace { label: "high", log: log.clone() }, 5)
        .prepend(Trace { label: "outer", log: log.clone() });
    let core = CountingCore { calls: AtomicUsize::new(0) };
    let request = Request::get("https://example.com/").resolve(None)?;
    pipeline.handle(request, &core).await?;
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "outer:before",
            "high:before",
            "low:before",
            "low:after",
            "high:after",
            "outer:after"
        ]
    );
    assert_eq!(core.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn middleware_ties_break_by_insertion_order() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = MiddlewarePipeline::new()
        .with(Trace { label: "first", log: log.clone() })
        .with(Trace { label: "second", log: log.clone() });
    let core = CountingCore { calls: AtomicUsize::new(0) };
    pipeline
        .handle(Request::get("https://example.com/").resolve(None)?, &core)
        .await?;
    assert_eq!(
        log.lock().unwrap()[..2],
        ["first:before".to_string(), "second:before".to_string()]
    );
    Ok(())
}

struct ShortCircuit;

#[async_trait::async_trait]
impl Middleware for ShortCircuit {
    async fn handle(&self, _request: Request, _next: Next<'_>) -> Result<Response> {
        Response::from_status(418)
    }
}

#[tokio::test]
async fn middleware_can_short_circuit() -> Result<()> {
    let pipeline = MiddlewarePipeline::new().with(ShortCircuit);
    let core = CountingCore { calls: AtomicUsize::new(0) };
    let response = pipeline
        .handle(Request::get("https://example.com/").resolve(None)?, &core)
        .await?;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(core.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn empty_pipeline_is_a_direct_call() -> Result<()> {
    let pipeline = MiddlewarePipeline::new();
    assert!(pipeline.is_empty());
    let core = CountingCore { calls: AtomicUsize::new(0) };
    let response = pipeline
        .handle(Request::get("https://example.com/").resolve(None)?, &core)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(core.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

// ---------------------------------------------------------------- mock server

fn resolved(method: Method, url: &str) -> Request {
    Request::new(method, url).resolve(None).expect("test url should resolve")
}

#[tokio::test]
async fn mock_prefers_the_most_specific_pattern() -> Result<()> {
    let mock = MockServer::new();
    mock.fake(
        "api.example.com/users/123",
        MockResponse::new().json(serde_json::json!({ "specific": true })),
    );
    mock.fake(
        "api.example.com/users/*",
        MockResponse::new().json(serde_json::json!({ "wildcard": true })),
    );

    let specific = mock
        .intercept(&resolved(Method::GET, "https://api.example.com/users/123"))
        .await?
        .expect("pattern should match");
    assert_eq!(specific.json_get("specific").unwrap(), true);

    let wildcard = mock
        .intercept(&resolved(Method::GET, "https://api.example.com/users/456"))
        .await?
        .expect("pattern should match");
    assert_eq!(wildcard.json_get("wildcard").unwrap(), true);
    Ok(())
}

#[tokio::test]
async fn mock_honors_method_filters() -> Result<()> {
    let mock = MockServer::new();
    mock.fake("POST api.example.com/*", MockResponse::new().status(201));
    let response = mock
        .intercept(&resolved(Method::POST, "https://api.example.com/users"))
        .await?;
    assert_eq!(response.expect("POST matches").status(), 201);
    let passthrough = mock
        .intercept(&resolved(Method::GET, "https://api.example.com/users"))
        .await?;
    assert!(passthrough.is_none());
    Ok(())
}

#[tokio::test]
async fn mock_sequences_pop_and_exhaust() -> Result<()> {
    let mock = MockServer::new();
    mock.fake(
        "api.example.com/*",
        MockResponseSequence::new().then_status(500).then_status(200),
    );
    let request = resolved(Method::GET, "https://api.example.com/x");
    assert_eq!(mock.intercept(&request).await?.unwrap().status(), 500);
    assert_eq!(mock.intercept(&request).await?.unwrap().status(), 200);
    assert!(matches!(
        mock.intercept(&request).await,
        Err(Error::MockSequenceExhausted)
    ));
    Ok(())
}

#[tokio::test]
async fn mock_sequences_support_defaults_and_looping() -> Result<()> {
    let mock = MockServer::new();
    mock.fake(
        "api.example.com/a*",
        MockResponseSequence::new()
            .then_status(201)
            .when_empty(MockResponse::new().status(204)),
    );
    mock.fake(
        "api.example.com/b*",
        MockResponseSequence::new()
            .then_status(301)
            .then_status(302)
            .looping(),
    );
    let a = resolved(Method::GET, "https://api.example.com/a");
    assert_eq!(mock.intercept(&a).await?.unwrap().status(), 201);
    assert_eq!(mock.intercept(&a).await?.unwrap().status(), 204);
    assert_eq!(mock.intercept(&a).await?.unwrap().status(), 204);
    let b = resolved(Method::GET, "https://api.example.com/b");
    assert_eq!(mock.intercept(&b).await?.unwrap().status(), 301);
    assert_eq!(mock.intercept(&b).await?.unwrap().status(), 302);
    assert_eq!(mock.intercept(&b).await?.unwrap().status(), 301);
    Ok(())
}

#[tokio::test]
async fn mock_prevents_stray_requests_with_allow_list() -> Result<()> {
    let mock = MockServer::new();
    mock.prevent_stray_requests();
    mock.allow_stray(["allowed.example.com/*"]);
    let stray = mock
        .intercept(&resolved(Method::GET, "https://api.example.com/x"))
        .await;
    assert!(matches!(stray, Err(Error::NoFakeResponseRegistered { .. })));
    let allowed = mock
        .intercept(&resolved(Method::GET, "https://allowed.example.com/x"))
        .await?;
    assert!(allowed.is_none());
    Ok(())
}

#[tokio::test]
async fn mock_function_fallback_runs_after_patterns() -> Result<()> {
    let mock = MockServer::new();
    mock.fake("api.example.com/known", MockResponse::new().status(200));
    mock.fake_fn(|request| {
        (request.method() == Method::DELETE)
            .then(|| MockResponse::new().status(204))
    });
    let known = mock
        .intercept(&resolved(Method::DELETE, "https://api.example.com/known"))
        .await?;
    assert_eq!(known.unwrap().status(), 200);
    let fallback = mock
        .intercept(&resolved(Method::DELETE, "https://api.example.com/other"))
        .await?;
    assert_eq!(fallback.unwrap().status(), 204);
    let unmatched = mock
        .intercept(&resolved(Method::GET, "https://api.example.com/other"))
        .await?;
    assert!(unmatched.is_none());
    Ok(())
}

#[tokio::test]
async fn mock_throw_raises_the_transport_error() -> Result<()> {
    let mock = MockServer::new();
    mock.fake(
        "api.example.com/*",
        MockResponse::new().throw(TransportError::Connect("refused".into())),
    );
    let result = mock
        .intercept(&resolved(Method::GET, "https://api.example.com/x"))
        .await;
    match result {
        Err(Error::Transport { source, .. }) => {
            assert!(matches!(source, TransportError::Connect(_)));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert_eq!(mock.sent_count(), 1);
    Ok(())
}

#[tokio::test]
async fn mock_assertions_count_matching_requests() -> Result<()> {
    let mock = MockServer::new();
    mock.fake("api.example.com/*", MockResponse::new());
    mock.assert_nothing_sent();
    mock.intercept(&resolved(Method::GET, "https://api.example.com/a")).await?;
    mock.intercept(&resolved(Method::POST, "https://api.example.com/b")).await?;
    mock.assert_sent("api.example.com/*");
    mock.assert_sent_times("POST api.example.com/*", 1);
    mock.assert_not_sent("other.example.com/*");
    mock.assert_sent_count(2);
    mock.assert_sent_fn(|request| request.method() == Method::POST);
    assert_eq!(mock.recorded().len(), 2);
    mock.reset();
    mock.assert_nothing_sent();
    Ok(())
}

#[tokio::test]
async fn mock_glob_star_matches_any_uri() -> Result<()> {
    let mock = MockServer::new();
    mock.fake("*", MockResponse::new().status(200));
    for url in ["https://a/", "https://b.example.com/x?y=1"] {
        let response = mock.intercept(&resolved(Method::GET, url)).await?;
        assert!(response.is_some(), "{url} should match");
    }
    Ok(())
}

// ---------------------------------------------------------------- recorder

#[test]
fn recordings_round_trip_through_json() -> Result<()> {
    let recorder = Recorder::new();
    recorder.start();
    assert!(recorder.is_recording());
    let request = resolved(Method::GET, "https://api.example.com/x");
    let response = Response::from_status(200)?
        .with_header("content-type", "text/plain")?
        .with_body("hello");
    recorder.capture(&request, &response);
    let recordings = recorder.stop();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].response.body, "hello");

    let json = recorder.export_to_json()?;
    let imported = Recorder::import_from_json(&json)?;
    assert_eq!(imported, recordings);
    Ok(())
}

#[tokio::test]
async fn replay_installs_per_url_sequences() -> Result<()> {
    let recorder = Recorder::new();
    recorder.start();
    let request = resolved(Method::GET, "https://api.example.com/x");
    recorder.capture(&request, &Response::from_status(200)?.with_body("one"));
    recorder.capture(&request, &Response::from_status(200)?.with_body("two"));
    let recordings = recorder.stop();

    let mock = MockServer::new();
    Recorder::replay(&recordings, &mock);
    let first = mock.intercept(&request).await?.unwrap();
    assert_eq!(first.text(), "one");
    let second = mock.intercept(&request).await?.unwrap();
    assert_eq!(second.text(), "two");
    Ok(())
}

// ---------------------------------------------------------------- task

type BoxedTask = std::pin::Pin<
    Box<
        dyn std::future::Future<
            Output = std::result::Result<u32, &'static str>,
        >,
    >,
>;

fn boxed(
    task: impl std::future::Future<Output = std::result::Result<u32, &'static str>>
        + 'static,
) -> BoxedTask {
    Box::pin(task)
}

#[tokio::test]
async fn task_all_preserves_order_and_reports_first_error() {
    let ok = task::all(vec![
        boxed(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(1)
        }),
        boxed(async { Ok(2) }),
    ])
    .await;
    assert_eq!(ok, Ok(vec![1, 2]));

    let completed = Arc::new(AtomicUsize::new(0));
    let seen = completed.clone();
    let err = task::all(vec![
        boxed(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }),
        boxed(async { Err("boom") }),
    ])
    .await;
    assert_eq!(err, Err("boom"));
    // the slow task still completed before the error surfaced
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn task_race_settles_with_the_first() {
    let result = task::race(vec![
        boxed(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        }),
        boxed(async { Ok(2) }),
    ])
    .await;
    assert_eq!(result, Ok(2));
}

#[tokio::test]
async fn task_any_resolves_on_first_success_or_collects_errors() {
    let result =
        task::any(vec![boxed(async { Err("first") }), boxed(async { Ok(7) })])
            .await;
    assert_eq!(result, Ok(7));

    let failures = task::any(vec![
        boxed(async { Err("first") }),
        boxed(async { Err("second") }),
    ])
    .await;
    assert_eq!(failures, Err(vec!["first", "second"]));
}

type SeqFut = std::pin::Pin<
    Box<dyn std::future::Future<Output = std::result::Result<usize, &'static str>>>,
>;

#[tokio::test]
async fn task_sequence_feeds_prior_results() {
    let factories: Vec<fn(&[usize]) -> SeqFut> = vec![
        |_prior| Box::pin(async { Ok(10) }),
        |prior| {
            let sum: usize = prior.iter().sum();
            Box::pin(async move { Ok(sum + 5) })
        },
    ];
    let results = task::sequence(factories).await;
    assert_eq!(results, Ok(vec![10, 15]));
}

#[tokio::test]
async fn task_map_bounds_concurrency_and_preserves_order() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let results: std::result::Result<Vec<usize>, &str> =
        task::map(0..10usize, 3, |item| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(item * 2)
            }
        })
        .await;
    assert_eq!(results, Ok((0..10).map(|item| item * 2).collect()));
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

// ---------------------------------------------------------------- model

#[test]
fn header_bag_round_trips_and_ignores_case() -> Result<()> {
    let mut map = HeaderMap::new();
    map.append("Accept", "application/json".parse()?);
    map.append("X-Tag", "a".parse()?);
    map.append("X-Tag", "b".parse()?);
    let bag = HeaderBag::from(&map);
    assert_eq!(bag.get("ACCEPT"), Some("application/json"));
    assert_eq!(bag.get_all("x-tag"), ["a", "b"]);
    let rebuilt = bag.to_header_map()?;
    assert_eq!(rebuilt.get_all("x-tag").iter().count(), 2);
    Ok(())
}

#[test]
fn body_encodings_set_content_types() -> Result<()> {
    let (content_type, bytes) =
        Body::Json(serde_json::json!({ "a": 1 })).encode()?.unwrap();
    assert_eq!(content_type, "application/json");
    assert_eq!(bytes.as_ref(), br#"{"a":1}"#);

    let (content_type, bytes) =
        Body::Form(vec![("a".into(), "1 2".into())]).encode()?.unwrap();
    assert_eq!(content_type, "application/x-www-form-urlencoded");
    assert_eq!(bytes.as_ref(), b"a=1+2");

    let parts = vec![Part::text("field", "value").filename("f.txt")];
    let (content_type, bytes) = Body::Multipart(parts.clone()).encode()?.unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
    let rendered = String::from_utf8_lossy(&bytes).into_owned();
    assert!(rendered.contains("name=\"field\""));
    assert!(rendered.contains("filename=\"f.txt\""));
    // deterministic boundary: identical parts encode identically
    let (_, again) = Body::Multipart(parts).encode()?.unwrap();
    assert_eq!(bytes, again);
    Ok(())
}

#[test]
fn form_body_hash_is_order_independent() -> Result<()> {
    let first =
        Body::Form(vec![("b".into(), "2".into()), ("a".into(), "1".into())]);
    let second =
        Body::Form(vec![("a".into(), "1".into()), ("b".into(), "2".into())]);
    assert_eq!(first.canonical_bytes()?, second.canonical_bytes()?);
    Ok(())
}

#[test]
fn body_on_get_is_rejected_but_delete_is_allowed() {
    let get = Request::get("https://example.com/").body_bytes("x").resolve(None);
    assert!(matches!(get, Err(Error::InvalidInput(_))));
    let delete =
        Request::delete("https://example.com/").body_bytes("x").resolve(None);
    assert!(delete.is_ok());
}

#[test]
fn invalid_builder_input_surfaces_at_resolve() {
    let request = Request::get("https://example.com/").header("bad\nname", "v");
    assert!(matches!(request.resolve(None), Err(Error::InvalidInput(_))));
}

#[test]
fn response_accessors_decode_explicitly() -> Result<()> {
    let response = Response::from_status(200)?
        .with_body(r#"{"name":"ada","age":36}"#)
        .with_version(HttpVersion::H2);
    assert!(response.is_success());
    assert_eq!(response.json_get("name").unwrap(), "ada");
    assert_eq!(response.version(), HttpVersion::H2);
    assert_eq!(response.reason(), "OK");
    let value: serde_json::Value = response.json()?;
    assert_eq!(value["age"], 36);
    Ok(())
}

#[test]
fn transport_error_context_is_attached() {
    let error = Error::Transport {
        source: TransportError::Timeout,
        method: "GET".into(),
        url: "https://api.example.com/x".into(),
        attempts: 4,
        elapsed_ms: 1500,
    };
    let rendered = error.to_string();
    assert!(rendered.contains("GET"));
    assert!(rendered.contains("attempts=4"));
    assert!(error.network_failure().is_some());
    let fatal = Error::Transport {
        source: TransportError::Tls("bad".into()),
        method: "GET".into(),
        url: "u".into(),
        attempts: 1,
        elapsed_ms: 1,
    };
    assert!(fatal.network_failure().is_none());
}
