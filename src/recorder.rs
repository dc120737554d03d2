//! Capture of request/response pairs, JSON export/import, and replay

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::headers::HeaderBag;
use crate::mock::{MockResponse, MockResponseSequence, MockServer};
use crate::request::Request;
use crate::response::Response;

/// The request half of a [`Recording`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    /// Request method
    pub method: String,
    /// Absolute request URL
    pub url: String,
    /// Request headers
    pub headers: HashMap<String, Vec<String>>,
    /// Request body as text
    pub body: String,
}

/// The response half of a [`Recording`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// Response status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, Vec<String>>,
    /// Response body as text
    pub body: String,
}

/// One captured exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// The request as sent
    pub request: RecordedRequest,
    /// The response as received
    pub response: RecordedResponse,
    /// Capture time as seconds since the Unix epoch
    pub timestamp: f64,
}

#[derive(Debug, Default)]
struct RecorderState {
    recording: bool,
    entries: Vec<Recording>,
}

/// Captures every exchange a client performs while active
///
/// Recordings export to JSON for cross-process reuse and replay through a
/// [`MockServer`]: replay installs one response sequence per URL, so
/// repeated calls to the same URL play captured responses back in order.
#[derive(Debug, Default)]
pub struct Recorder {
    state: Mutex<RecorderState>,
}

impl Recorder {
    /// Creates an inactive recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears prior recordings and begins capturing
    pub fn start(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recording = true;
    }

    /// Stops capturing and returns the recordings
    pub fn stop(&self) -> Vec<Recording> {
        let mut state = self.lock();
        state.recording = false;
        state.entries.clone()
    }

    /// True while capture is active
    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// The recordings captured so far
    pub fn recordings(&self) -> Vec<Recording> {
        self.lock().entries.clone()
    }

    /// Captures one exchange, when recording
    pub(crate) fn capture(&self, request: &Request, response: &Response) {
        let mut state = self.lock();
        if !state.recording {
            return;
        }
        let url = match request.url() {
            Some(url) => url.to_string(),
            None => request.target().to_string(),
        };
        let body = request
            .body()
            .encode()
            .ok()
            .flatten()
            .map(|(_, bytes)| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        state.entries.push(Recording {
            request: RecordedRequest {
                method: request.method().to_string(),
                url,
                headers: HeaderBag::from(request.headers()).into(),
                body,
            },
            response: RecordedResponse {
                status: response.status().as_u16(),
                headers: HeaderBag::from(response.headers()).into(),
                body: response.text(),
            },
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs_f64())
                .unwrap_or(0.0),
        });
    }

    /// Serializes the recordings captured so far to JSON
    pub fn export_to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.recordings())?)
    }

    /// Parses recordings exported by [`export_to_json`](Recorder::export_to_json)
    pub fn import_from_json(json: &str) -> Result<Vec<Recording>> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses recordings and immediately installs them on a mock server
    pub fn import_and_replay(
        json: &str,
        mock: &MockServer,
    ) -> Result<Vec<Recording>> {
        let recordings = Self::import_from_json(json)?;
        Self::replay(&recordings, mock);
        Ok(recordings)
    }

    /// Installs one mock sequence per URL so repeated calls replay the
    /// captured responses in order
    pub fn replay(recordings: &[Recording], mock: &MockServer) {
        let mut by_url: Vec<(String, MockResponseSequence)> = Vec::new();
        for recording in recordings {
            let response = mock_from(&recording.response);
            match by_url
                .iter_mut()
                .find(|(url, _)| *url == recording.request.url)
            {
                Some((_, sequence)) => {
                    let taken = std::mem::take(sequence);
                    *sequence = taken.then(response);
                }
                None => {
                    by_url.push((
                        recording.request.url.clone(),
                        MockResponseSequence::new().then(response),
                    ));
                }
            }
        }
        for (url, sequence) in by_url {
            mock.fake(&url, sequence);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn mock_from(recorded: &RecordedResponse) -> MockResponse {
    let mut response = MockResponse::new()
        .status(recorded.status)
        .body(recorded.body.clone().into_bytes());
    for (name, values) in &recorded.headers {
        for value in values {
            response = response.header(name, value);
        }
    }
    response
}
