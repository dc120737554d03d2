//! The mock server: pattern-matched fake responses, sequences, and
//! assertions
//!
//! A [`MockServer`] is an explicit instance attached to a
//! [`Client`](crate::Client); tests share it by `Arc`, inspect what was
//! sent, and construct a fresh one (or call [`reset`](MockServer::reset))
//! between tests. Requests it answers never reach the transport.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::transport::TransportError;

/// A canned response returned by the mock server
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
    delay: Option<Duration>,
    error: Option<TransportError>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Bytes::new(),
            delay: None,
            error: None,
        }
    }
}

impl MockResponse {
    /// A `200 OK` with an empty body
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status code
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Sets the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body and the matching content type
    pub fn json(mut self, value: Value) -> Self {
        self.body = serde_json::to_vec(&value).unwrap_or_default().into();
        self.headers
            .push(("content-type".into(), "application/json".into()));
        self
    }

    /// Appends a header
    pub fn header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sleeps this long before responding (a cooperative yield)
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Raises a transport error instead of responding, for testing
    /// network-failure paths
    pub fn throw(mut self, error: TransportError) -> Self {
        self.error = Some(error);
        self
    }

    fn into_response(self) -> Result<Response> {
        let mut response =
            Response::from_status(self.status)?.with_body(self.body);
        for (name, value) in &self.headers {
            response = response.with_header(name, value)?;
        }
        Ok(response)
    }
}

/// A sequence of mock responses, popped one per match
///
/// When drained it returns its `when_empty` default, cycles if `looping`,
/// or fails the request with
/// [`Error::MockSequenceExhausted`](crate::Error::MockSequenceExhausted).
#[derive(Debug, Default)]
pub struct MockResponseSequence {
    inner: Mutex<SequenceState>,
}

#[derive(Debug, Default)]
struct SequenceState {
    items: VecDeque<MockResponse>,
    when_empty: Option<MockResponse>,
    looping: bool,
}

impl MockResponseSequence {
    /// Creates an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a response to the sequence
    pub fn then(self, response: MockResponse) -> Self {
        self.lock().items.push_back(response);
        self
    }

    /// Appends a plain status response to the sequence
    pub fn then_status(self, status: u16) -> Self {
        self.then(MockResponse::new().status(status))
    }

    /// Returns this response once the sequence is drained
    pub fn when_empty(self, response: MockResponse) -> Self {
        self.lock().when_empty = Some(response);
        self
    }

    /// Cycles back to the start instead of draining
    pub fn looping(self) -> Self {
        self.lock().looping = true;
        self
    }

    /// How many responses remain before the sequence drains
    pub fn remaining(&self) -> usize {
        self.lock().items.len()
    }

    /// True when the sequence has drained
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn next(&self) -> Result<MockResponse> {
        let mut state = self.lock();
        match state.items.pop_front() {
            Some(response) => {
                if state.looping {
                    state.items.push_back(response.clone());
                }
                Ok(response)
            }
            None => match &state.when_empty {
                Some(default) => Ok(default.clone()),
                None => Err(Error::MockSequenceExhausted),
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, SequenceState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// How a registered pattern answers a matching request
#[derive(Clone)]
pub enum MockResponder {
    /// The same response every time
    Static(MockResponse),
    /// The next response in a sequence each time
    Sequence(Arc<MockResponseSequence>),
    /// A function of the request
    Callback(Arc<dyn Fn(&Request) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockResponder::Static(response) => {
                f.debug_tuple("Static").field(response).finish()
            }
            MockResponder::Sequence(sequence) => {
                f.debug_tuple("Sequence").field(sequence).finish()
            }
            MockResponder::Callback(_) => {
                f.debug_tuple("Callback").field(&"Fn(&Request)").finish()
            }
        }
    }
}

impl From<MockResponse> for MockResponder {
    fn from(response: MockResponse) -> Self {
        MockResponder::Static(response)
    }
}

impl From<MockResponseSequence> for MockResponder {
    fn from(sequence: MockResponseSequence) -> Self {
        MockResponder::Sequence(Arc::new(sequence))
    }
}

impl From<Arc<MockResponseSequence>> for MockResponder {
    fn from(sequence: Arc<MockResponseSequence>) -> Self {
        MockResponder::Sequence(sequence)
    }
}

type FallbackFn = Arc<dyn Fn(&Request) -> Option<MockResponse> + Send + Sync>;

#[derive(Debug)]
struct FakeEntry {
    method: Option<Method>,
    pattern: String,
    wildcards: usize,
    responder: MockResponder,
    seq: usize,
}

#[derive(Default)]
struct MockState {
    fakes: Vec<FakeEntry>,
    fallbacks: Vec<FallbackFn>,
    prevent_stray: bool,
    allow_stray: Vec<String>,
    sent: Vec<(Request, Option<Response>)>,
}

enum Decision {
    Respond(MockResponse),
    Stray,
    Passthrough,
}

/// Routes requests to registered fake responses
///
/// Patterns are `"[METHOD ]URL_GLOB"` where `*` matches any character
/// sequence; scheme and host match case-insensitively, path and query
/// case-sensitively, and a pattern without a scheme gets an implicit
/// leading `*`. The most specific match wins: exact URLs beat globs, fewer
/// wildcards beat more, and ties go to the first registered. Function
/// fallbacks run only after every pattern has failed.
#[derive(Default)]
pub struct MockServer {
    state: Mutex<MockState>,
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MockServer")
            .field("fakes", &state.fakes.len())
            .field("prevent_stray", &state.prevent_stray)
            .field("sent", &state.sent.len())
            .finish()
    }
}

impl MockServer {
    /// Creates a mock server with no fakes installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a responder for a `"[METHOD ]URL_GLOB"` pattern
    pub fn fake(&self, pattern: &str, responder: impl Into<MockResponder>) {
        let (method, glob) = parse_pattern(pattern);
        let mut state = self.lock();
        let seq = state.fakes.len();
        state.fakes.push(FakeEntry {
            method,
            wildcards: glob.matches('*').count(),
            pattern: glob,
            responder: responder.into(),
            seq,
        });
    }

    /// Installs a fallback callback that may answer any request; it runs
    /// after pattern candidates fail, and returning `None` passes the
    /// request along
    pub fn fake_fn(
        &self,
        callback: impl Fn(&Request) -> Option<MockResponse> + Send + Sync + 'static,
    ) {
        self.lock().fallbacks.push(Arc::new(callback));
    }

    /// Makes any unmatched request fail with
    /// [`Error::NoFakeResponseRegistered`](crate::Error::NoFakeResponseRegistered)
    pub fn prevent_stray_requests(&self) {
        self.lock().prevent_stray = true;
    }

    /// Allow-lists URL globs that may pass through to the real transport
    /// even while stray requests are prevented
    pub fn allow_stray(
        &self,
        globs: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.lock().allow_stray.extend(globs.into_iter().map(Into::into));
    }

    /// Clears fakes, fallbacks, stray settings, and the sent log
    pub fn reset(&self) {
        *self.lock() = MockState::default();
    }

    /// The ordered list of exchanges this server has handled
    pub fn recorded(&self) -> Vec<(Request, Response)> {
        self.recorded_matching(|_, _| true)
    }

    /// The recorded exchanges passing a filter
    pub fn recorded_matching(
        &self,
        filter: impl Fn(&Request, &Response) -> bool,
    ) -> Vec<(Request, Response)> {
        self.lock()
            .sent
            .iter()
            .filter_map(|(request, response)| {
                let response = response.as_ref()?;
                filter(request, response)
                    .then(|| (request.clone(), response.clone()))
            })
            .collect()
    }

    /// How many requests reached this server
    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Panics unless at least one sent request matches the pattern
    pub fn assert_sent(&self, pattern: &str) {
        let count = self.sent_matching(pattern);
        assert!(
            count > 0,
            "expected at least one request matching {pattern:?}, but none were sent"
        );
    }

    /// Panics unless exactly `times` sent requests match the pattern
    pub fn assert_sent_times(&self, pattern: &str, times: usize) {
        let count = self.sent_matching(pattern);
        assert_eq!(
            count, times,
            "expected {times} requests matching {pattern:?}, saw {count}"
        );
    }

    /// Panics unless at least one sent request satisfies the predicate
    pub fn assert_sent_fn(&self, predicate: impl Fn(&Request) -> bool) {
        let found =
            self.lock().sent.iter().any(|(request, _)| predicate(request));
        assert!(found, "expected a sent request matching the predicate");
    }

    /// Panics if any sent request matches the pattern
    pub fn assert_not_sent(&self, pattern: &str) {
        let count = self.sent_matching(pattern);
        assert_eq!(
            count, 0,
            "expected no requests matching {pattern:?}, saw {count}"
        );
    }

    /// Panics unless exactly `count` requests were sent in total
    pub fn assert_sent_count(&self, count: usize) {
        let sent = self.sent_count();
        assert_eq!(sent, count, "expected {count} requests, saw {sent}");
    }

    /// Panics if any request was sent
    pub fn assert_nothing_sent(&self) {
        let sent = self.sent_count();
        assert_eq!(sent, 0, "expected no requests, saw {sent}");
    }

    fn sent_matching(&self, pattern: &str) -> usize {
        let (method, glob) = parse_pattern(pattern);
        self.lock()
            .sent
            .iter()
            .filter(|(request, _)| {
                method
                    .as_ref()
                    .map_or(true, |method| request.method() == method)
                    && request
                        .url()
                        .is_some_and(|url| glob_matches(&glob, url.as_str()))
            })
            .count()
    }

    /// Answers a request from the installed fakes, or passes it through
    pub(crate) async fn intercept(
        &self,
        request: &Request,
    ) -> Result<Option<Response>> {
        let url = request.absolute_url()?.to_string();
        let decision = {
            let state = self.lock();
            let best = state
                .fakes
                .iter()
                .filter(|fake| {
                    fake.method
                        .as_ref()
                        .map_or(true, |method| request.method() == method)
                        && glob_matches(&fake.pattern, &url)
                })
                .min_by_key(|fake| (fake.wildcards, fake.seq));
            match best {
                Some(fake) => {
                    log::debug!(
                        "mock match {:?} for {request}",
                        fake.pattern
                    );
                    match &fake.responder {
                        MockResponder::Static(response) => {
                            Decision::Respond(response.clone())
                        }
                        MockResponder::Sequence(sequence) => {
                            Decision::Respond(sequence.next()?)
                        }
                        MockResponder::Callback(callback) => {
                            Decision::Respond(callback(request))
                        }
                    }
                }
                None => {
                    match state
                        .fallbacks
                        .iter()
                        .find_map(|callback| callback(request))
                    {
                        Some(response) => Decision::Respond(response),
                        None if state.prevent_stray
                            && !state
                                .allow_stray
                                .iter()
                                .any(|glob| glob_matches(glob, &url)) =>
                        {
                            Decision::Stray
                        }
                        None => Decision::Passthrough,
                    }
                }
            }
        };
        match decision {
            Decision::Respond(mock) => {
                if let Some(delay) = mock.delay {
                    tokio::time::sleep(delay).await;
                }
                if let Some(error) = mock.error.clone() {
                    self.lock().sent.push((request.clone(), None));
                    return Err(Error::Transport {
                        source: error,
                        method: request.method().to_string(),
                        url,
                        attempts: 1,
                        elapsed_ms: 0,
                    });
                }
                let response = mock.into_response()?;
                self.lock()
                    .sent
                    .push((request.clone(), Some(response.clone())));
                Ok(Some(response))
            }
            Decision::Stray => Err(Error::NoFakeResponseRegistered {
                method: request.method().to_string(),
                url,
            }),
            Decision::Passthrough => Ok(None),
        }
    }

    /// Logs an exchange that passed through to the real transport
    pub(crate) fn note_passthrough(
        &self,
        request: &Request,
        response: &Response,
    ) {
        self.lock().sent.push((request.clone(), Some(response.clone())));
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "TRACE",
    "CONNECT",
];

fn parse_pattern(pattern: &str) -> (Option<Method>, String) {
    if let Some((first, rest)) = pattern.split_once(' ') {
        if KNOWN_METHODS.contains(&first) {
            if let Ok(method) = first.parse::<Method>() {
                return (Some(method), rest.trim().to_string());
            }
        }
    }
    (None, pattern.to_string())
}

/// Matches a URL against a glob, applying the implicit leading `*` for
/// scheme-less patterns and case-insensitivity on scheme and host
fn glob_matches(pattern: &str, url: &str) -> bool {
    let canonical = canonicalize_pattern(pattern);
    wildcard_match(&canonical, url)
}

fn canonicalize_pattern(pattern: &str) -> String {
    match pattern.find("://") {
        Some(scheme_end) => {
            // The URL side keeps scheme and host lowercase already, so
            // lowercasing the pattern's authority gives case-insensitive
            // scheme/host matching while the path stays case-sensitive.
            let path_start = pattern[scheme_end + 3..]
                .find('/')
                .map(|offset| scheme_end + 3 + offset)
                .unwrap_or(pattern.len());
            format!(
                "{}{}",
                pattern[..path_start].to_ascii_lowercase(),
                &pattern[path_start..]
            )
        }
        None => format!("*{pattern}"),
    }
}

// Classic iterative wildcard matching: `*` matches any character sequence.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
