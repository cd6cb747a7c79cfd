//! Retry state machine shared by every call that reaches the network.
//!
//! Each attempt ends in one of four verdicts:
//!
//! - `Accept`: 2xx, hand the response to the caller
//! - `Retry(delay)`: 429 or 5xx with budget left, sleep then resend
//! - `Exhausted`: 429 or 5xx with the budget spent, fail with `RetriesExhausted`
//! - `Reject`: any other status, fail at once
//!
//! 429 waits for `Retry-After` seconds (5 s when absent, never more than 60 s).
//! 5xx waits `2^attempt` seconds, attempt counting from 0.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};
use tracing::{debug, warn};

use crate::error::{GraphError, GraphResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Suspends the caller between attempts. Swapped out in tests so no real time passes.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Retry(Duration),
    Exhausted,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a call makes at most `max_retries + 1` requests.
    pub max_retries: u32,
    pub default_retry_after: Duration,
    pub max_retry_after: Duration,
    /// Unit of the exponential 5xx backoff.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            default_retry_after: DEFAULT_RETRY_AFTER,
            max_retry_after: MAX_RETRY_AFTER,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay requested by a 429, capped.
    pub fn retry_after(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
            .min(self.max_retry_after)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn decide(&self, attempt: u32, status: StatusCode, headers: &HeaderMap) -> Verdict {
        if status.is_success() {
            return Verdict::Accept;
        }

        let delay = if status == StatusCode::TOO_MANY_REQUESTS {
            self.retry_after(headers)
        } else if status.is_server_error() {
            self.backoff(attempt)
        } else {
            return Verdict::Reject;
        };

        if attempt < self.max_retries {
            Verdict::Retry(delay)
        } else {
            Verdict::Exhausted
        }
    }
}

/// Send the request built by `build` until the policy accepts or gives up.
///
/// `build` is called once per attempt. The accepted response is returned
/// unread so callers can decide how to interpret the body.
pub async fn send_with_retry<F>(
    build: F,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> GraphResult<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;

    loop {
        let response = build().send().await?;
        let status = response.status();
        debug!(status = %status, attempt, "graph response");

        match policy.decide(attempt, status, response.headers()) {
            Verdict::Accept => return Ok(response),
            Verdict::Retry(delay) => {
                warn!(
                    status = %status,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying graph request"
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Verdict::Exhausted => {
                let last = error_from_response(response, policy).await;
                return Err(GraphError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(last),
                });
            }
            Verdict::Reject => return Err(error_from_response(response, policy).await),
        }
    }
}

async fn error_from_response(response: Response, policy: &RetryPolicy) -> GraphError {
    let status = response.status();
    let retry_after = policy.retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    GraphError::from_status(status, retry_after, &body)
}
