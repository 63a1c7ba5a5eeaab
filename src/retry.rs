//! Retry with exponential backoff for external service calls.
//!
//! Every HTTP provider funnels its requests through [`with_retry`] and
//! [`send_json`], so all services share one failure classification:
//!
//! - HTTP 429 and 5xx → [`ServiceError::Transient`], retried
//! - request timeout → [`ServiceError::Timeout`], retried
//! - connection errors → [`ServiceError::Transient`], retried
//! - other 4xx → [`ServiceError::Permanent`], fails immediately
//! - 2xx with an unexpected body → [`ServiceError::Malformed`], fails immediately
//!
//! Backoff doubles from `base_delay` (1s, 2s, 4s, ...) and is capped at 32s.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::warn;
use vignette_rag_core::ServiceError;

use crate::config::MAX_RETRIES_LIMIT;

const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.min(MAX_RETRIES_LIMIT),
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(MAX_BACKOFF_EXPONENT))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, ServiceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    error = %e,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "transient service failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Send one request and decode a JSON body of type `T`.
pub async fn send_json<T: DeserializeOwned>(
    service: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ServiceError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_reqwest(service, e))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status.as_u16(), &body));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| classify_reqwest(service, e))?;
    serde_json::from_slice(&bytes).map_err(|e| ServiceError::malformed(service, e.to_string()))
}

/// Map a non-success HTTP status to a [`ServiceError`].
pub fn classify_status(service: &str, status: u16, body: &str) -> ServiceError {
    let message = format!("HTTP {}: {}", status, truncate(body, 300));
    if status == 429 || (500..600).contains(&status) {
        ServiceError::transient(service, message)
    } else {
        ServiceError::permanent(service, message)
    }
}

pub fn classify_reqwest(service: &str, err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout {
            service: service.to_string(),
        }
    } else if err.is_decode() {
        ServiceError::malformed(service, err.to_string())
    } else {
        ServiceError::transient(service, err.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
