//! Busy-service retry shared by the document, compare and export clients.

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const MAX_ATTEMPTS: usize = 5;
const FIRST_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Successful response body with its declared content type.
#[derive(Debug, Clone)]
pub(crate) struct ServiceReply {
    pub(crate) content_type: Option<String>,
    pub(crate) body: Vec<u8>,
}

/// Attempt counter and wait schedule. The wait doubles from 2s up to 60s; a
/// longer `Retry-After` from the service wins, under the same cap.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Backoff {
    attempts: usize,
    delay: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            attempts: 1,
            delay: FIRST_DELAY,
        }
    }

    /// Wait before the next attempt, or `None` once every attempt is spent.
    fn after_busy(&mut self, hint: Option<Duration>) -> Option<Duration> {
        if self.attempts >= MAX_ATTEMPTS {
            return None;
        }
        self.attempts += 1;
        let wait = hint
            .map_or(self.delay, |hint| hint.max(self.delay))
            .min(MAX_DELAY);
        self.delay = self.delay.saturating_mul(2).min(MAX_DELAY);
        Some(wait)
    }
}

/// Only 429 and 503 are retried; every other failure is final.
fn busy(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}

/// `Retry-After` given in seconds. HTTP-date values are ignored.
fn retry_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Sends the request built by `build` until it succeeds, fails with a status
/// other than 429/503, or runs out of attempts.
pub(crate) async fn send_with_retry<F>(service: &str, mut build: F) -> Result<ServiceReply>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut backoff = Backoff::new();
    loop {
        let response = build()
            .send()
            .await
            .with_context(|| format!("failed to reach {}", service))?;
        let status = response.status();
        if busy(status)
            && let Some(wait) = backoff.after_busy(retry_hint(response.headers()))
        {
            warn!(
                "{} answered {}; retrying in {}s (attempt {}/{})",
                service,
                status,
                wait.as_secs(),
                backoff.attempts,
                MAX_ATTEMPTS
            );
            sleep(wait).await;
            continue;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read {} response", service))?
            .to_vec();
        if status.is_success() {
            debug!("{} answered {} ({} bytes)", service, status, body.len());
            return Ok(ServiceReply { content_type, body });
        }
        let text = String::from_utf8_lossy(&body);
        return Err(anyhow!("{} error ({}): {}", service, status, text.trim()));
    }
}
