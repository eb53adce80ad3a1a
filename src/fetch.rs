//! Page fetching with exponential backoff retry logic.
//!
//! The crawler and the article extractor only see the [`Fetch`] trait, so the
//! HTTP client can be swapped for a browser driver or a test stub.
//!
//! # Architecture
//!
//! - [`Fetch`]: core trait, one request in, raw page content out
//! - [`HttpFetcher`]: `reqwest` backed implementation
//! - [`RetryFetch`]: decorator that adds retry logic to any `Fetch` implementation
//!
//! Retries live here and nowhere else; the pagination engine treats any
//! error returned by a fetcher as final for that page.

use rand::{Rng, rng};
use reqwest::Client;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// A single page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Header name/value pairs, sent in order.
    pub headers: Vec<(String, String)>,
    /// How long a browser-backed fetcher should let the page settle.
    /// Plain HTTP fetchers ignore it.
    pub wait_hint: Option<StdDuration>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            wait_hint: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
impl FetchRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("blocked by anti-bot interstitial at {0}")]
    Blocked(String),
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Other(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Blocked(_) => false,
        }
    }
}

/// Something that turns a [`FetchRequest`] into raw page content.
pub trait Fetch {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError>;
}

/// `reqwest` backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: StdDuration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    async fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let final_url = response.url().clone();

        // Google answers rate limited clients with a redirect to /sorry/
        if final_url.path().starts_with("/sorry") {
            return Err(FetchError::Blocked(final_url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let body = non_empty_body(response.text().await?, &request.url)?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched page"
        );
        Ok(body)
    }
}

/// A successful response with nothing in it is treated as a transient failure.
fn non_empty_body(body: String, url: &str) -> Result<String, FetchError> {
    if body.trim().is_empty() {
        return Err(FetchError::Other(format!("empty response body from {url}")));
    }
    Ok(body)
}

/// Wrapper that adds exponential backoff retry logic to any [`Fetch`] implementation.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
///
/// Errors that [`FetchError::is_retryable`] rejects are returned immediately.
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryFetch<T>
where
    T: Fetch,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    pub fn with_max_delay(mut self, max_delay: StdDuration) -> Self {
        self.max_delay = max_delay;
        self
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        if delay.is_zero() {
            return delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Fetch for RetryFetch<T>
where
    T: Fetch,
{
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    async fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.fetch(request).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries || !e.is_retryable() {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "fetch() giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "fetch() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Fails `failures` times with `error`, then succeeds.
    struct Flaky {
        failures: usize,
        calls: Cell<usize>,
        error: fn() -> FetchError,
    }

    impl Fetch for Flaky {
        async fn fetch(&self, _request: &FetchRequest) -> Result<String, FetchError> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok("ok".to_string())
            }
        }
    }

    fn transient() -> FetchError {
        FetchError::Other("connection reset".to_string())
    }

    fn blocked() -> FetchError {
        FetchError::Blocked("https://www.google.com/sorry/index".to_string())
    }

    #[test]
    fn test_request_headers_lookup_is_case_insensitive() {
        let request = FetchRequest::new("https://example.com").with_header("User-Agent", "ua");
        assert_eq!(request.header("user-agent"), Some("ua"));
        assert_eq!(request.header("accept"), None);
        assert_eq!(request.wait_hint, None);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(transient().is_retryable());
        assert!(!blocked().is_retryable());
        let server = FetchError::Status { status: 503, url: String::new() };
        let missing = FetchError::Status { status: 404, url: String::new() };
        let throttled = FetchError::Status { status: 429, url: String::new() };
        assert!(server.is_retryable());
        assert!(!missing.is_retryable());
        assert!(throttled.is_retryable());
    }

    #[test]
    fn test_empty_body_is_a_retryable_failure() {
        let err = non_empty_body(" \n".to_string(), "https://example.com").unwrap_err();
        assert!(matches!(err, FetchError::Other(_)));
        assert!(err.is_retryable());
        assert_eq!(non_empty_body("<html>".to_string(), "u").unwrap(), "<html>");
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let inner = Flaky { failures: 2, calls: Cell::new(0), error: transient };
        let fetcher = RetryFetch::new(inner, 2, StdDuration::ZERO);
        let body = fetcher.fetch(&FetchRequest::new("https://example.com")).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(fetcher.inner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let inner = Flaky { failures: 5, calls: Cell::new(0), error: transient };
        let fetcher = RetryFetch::new(inner, 1, StdDuration::ZERO);
        let result = fetcher.fetch(&FetchRequest::new("https://example.com")).await;
        assert!(result.is_err());
        assert_eq!(fetcher.inner.calls.get(), 2);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_blocked_requests() {
        let inner = Flaky { failures: 1, calls: Cell::new(0), error: blocked };
        let fetcher = RetryFetch::new(inner, 3, StdDuration::ZERO);
        let result = fetcher.fetch(&FetchRequest::new("https://example.com")).await;
        assert!(matches!(result, Err(FetchError::Blocked(_))));
        assert_eq!(fetcher.inner.calls.get(), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let inner = Flaky { failures: 0, calls: Cell::new(0), error: transient };
        let fetcher = RetryFetch::new(inner, 10, StdDuration::from_secs(1))
            .with_max_delay(StdDuration::from_secs(4));
        let delay = fetcher.backoff(8);
        assert!(delay >= StdDuration::from_secs(4));
        assert!(delay <= StdDuration::from_millis(4250));
    }
}
