//! The retry controller: classification, backoff with jitter, attempt caps

use std::future::Future;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::response::Response;
use crate::transport::TransportError;

// Growth past this many doublings would overflow anyway; the per-attempt
// delay is already in the hours.
const MAX_BACKOFF_SHIFT: u32 = 20;

/// Retry policy for one client or one call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first; the transport runs at most
    /// `max_retries + 1` times
    pub max_retries: u32,
    /// Base backoff delay, doubled each attempt
    pub base_delay: Duration,
    /// Response statuses that re-enter the loop as retry signals
    pub retryable_statuses: Vec<u16>,
    /// Jitter fraction: each delay is scaled by a random factor in
    /// `1 ± jitter`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// The jittered exponential delay before attempt `k >= 1`, floored at
    /// one millisecond
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        let scaled = self.base_delay * (1u32 << doublings);
        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        scaled.mul_f64(factor.max(0.0)).max(Duration::from_millis(1))
    }
}

/// The result of one transport attempt, as seen by the retry loop
///
/// Retryable statuses are a signal, not an error: once the attempt budget is
/// spent the last such response is returned to the caller, never raised.
#[derive(Debug)]
pub enum Outcome {
    /// A response that settles the request
    Ok(Response),
    /// A retryable attempt result; re-enter the loop
    Retry(RetrySignal),
    /// A failure no retry can help; propagate
    Fatal(TransportError),
}

/// What made an attempt retryable
#[derive(Debug)]
pub enum RetrySignal {
    /// A response whose status is in the retryable set
    Status(Response),
    /// A network-class transport failure
    Transport(TransportError),
}

/// Classifies one attempt result against a policy
pub fn classify(
    policy: &RetryPolicy,
    result: Result<Response, TransportError>,
) -> Outcome {
    match result {
        Ok(response) => {
            if policy.retryable_statuses.contains(&response.status().as_u16())
            {
                Outcome::Retry(RetrySignal::Status(response))
            } else {
                Outcome::Ok(response)
            }
        }
        Err(error) if error.is_network() => {
            Outcome::Retry(RetrySignal::Transport(error))
        }
        Err(error) => Outcome::Fatal(error),
    }
}

/// Drives transport attempts under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    /// Creates a controller for the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy this controller runs
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it settles, a fatal error occurs, or the attempt cap
    /// is reached
    ///
    /// Returns the settled result and how many times `op` ran. The backoff
    /// sleep is cancellable; cancellation aborts between attempts (and
    /// drops an in-flight attempt) with [`TransportError::Cancelled`].
    pub async fn execute<F, Fut>(
        &self,
        token: &CancellationToken,
        mut op: F,
    ) -> (Result<Response, TransportError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Response, TransportError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            if token.is_cancelled() {
                return (Err(TransportError::Cancelled), attempts);
            }
            let result = tokio::select! {
                _ = token.cancelled() => {
                    return (Err(TransportError::Cancelled), attempts)
                }
                result = op(attempts) => result,
            };
            attempts += 1;
            let signal = match classify(&self.policy, result) {
                Outcome::Ok(response) => return (Ok(response), attempts),
                Outcome::Fatal(error) => return (Err(error), attempts),
                Outcome::Retry(signal) => signal,
            };
            if attempts > self.policy.max_retries {
                return (
                    match signal {
                        RetrySignal::Status(response) => Ok(response),
                        RetrySignal::Transport(error) => Err(error),
                    },
                    attempts,
                );
            }
            let mut delay = self.policy.delay_for(attempts);
            if let RetrySignal::Status(response) = &signal {
                if let Some(retry_after) = retry_after(response) {
                    delay = delay.max(retry_after);
                }
            }
            log::debug!(
                "retryable attempt {attempts} ({}), next in {delay:?}",
                signal_label(&signal)
            );
            tokio::select! {
                _ = token.cancelled() => {
                    return (Err(TransportError::Cancelled), attempts)
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn signal_label(signal: &RetrySignal) -> String {
    match signal {
        RetrySignal::Status(response) => {
            format!("status {}", response.status())
        }
        RetrySignal::Transport(error) => error.to_string(),
    }
}

/// Parses a `Retry-After` header: delta-seconds or an HTTP-date
pub fn retry_after(response: &Response) -> Option<Duration> {
    let value = response.header("retry-after")?;
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = httpdate::parse_http_date(value).ok()?;
    Some(
        date.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
