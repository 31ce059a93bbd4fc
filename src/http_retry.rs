//! HTTP fetch with bounded retry and fixed backoff.
//!
//! [`RetryState`] is the explicit state machine (attempt count, backoff,
//! terminal failure); [`fetch_bytes_with_retry`] drives it for segment
//! downloads. Only transport failures are retried: connection errors,
//! timeouts, non-2xx statuses and truncated bodies.

use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

/// Default number of fetch attempts per segment.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff between attempts in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 3000;

/// Configuration for [`fetch_bytes_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (minimum 1; 0 is treated as 1).
    pub max_attempts: u32,
    /// Sleep duration between consecutive attempts.
    pub backoff: Duration,
    /// Optional per-request timeout applied to each individual attempt.
    ///
    /// When `None`, the client's own timeout applies.
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            timeout: None,
        }
    }
}

/// Decision after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then try again.
    RetryAfter(Duration),
    /// Budget exhausted; the failure is terminal.
    GiveUp,
}

/// Attempt bookkeeping for one download.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    backoff: Duration,
}

impl RetryState {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
        }
    }

    /// Register the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Decide what to do after the current attempt failed.
    pub fn on_failure(&self) -> RetryDecision {
        if self.attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.backoff)
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Terminal failure of [`fetch_bytes_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub attempts: u32,
    /// Description of the last failure.
    pub reason: String,
}

/// GET `url` and read the full body, retrying transient failures.
///
/// # Errors
///
/// Returns the last failure once all attempts are exhausted.
pub async fn fetch_bytes_with_retry(
    client: &Client,
    url: &str,
    config: &RetryConfig,
) -> Result<Bytes, FetchFailure> {
    let mut state = RetryState::new(config);

    loop {
        let attempt = state.begin_attempt();
        let reason = match fetch_once(client, url, config.timeout).await {
            Ok(body) => return Ok(body),
            Err(reason) => reason,
        };

        warn!(
            "HTTP fetch failed for {} (attempt {}/{}): {}",
            url,
            attempt,
            state.max_attempts(),
            reason
        );
        crate::metrics::record_segment_attempt_failed();

        match state.on_failure() {
            RetryDecision::RetryAfter(backoff) => {
                warn!("Retrying HTTP fetch in {}ms...", backoff.as_millis());
                tokio::time::sleep(backoff).await;
            }
            RetryDecision::GiveUp => {
                return Err(FetchFailure {
                    attempts: state.attempts(),
                    reason,
                });
            }
        }
    }
}

async fn fetch_once(client: &Client, url: &str, timeout: Option<Duration>) -> Result<Bytes, String> {
    let mut request = client.get(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {status}"));
    }

    response.bytes().await.map_err(|e| e.to_string())
}
