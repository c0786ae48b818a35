//! HTTP retry helpers for transient errors.
//!
//! Every download goes through [`send_bytes`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, so connection failures,
//! timeouts, rate limiting and server errors are retried with exponential
//! backoff. The number of retries comes from configuration.
//!
//! ```ignore
//! let policy = RetryPolicy::new(3);
//! let body = retry::send_bytes(|| client.get(&url), &policy).await?;
//! ```

use std::time::Duration;

use crate::SourceError;

/// Default first backoff delay. Doubles on every further attempt.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on a single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// How many times, and how patiently, a request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means a single attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the default backoff.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    /// Overrides the delay before the first retry.
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Backoff before retry number `attempt` (1-based): `base`, `2 * base`,
    /// `4 * base`, ... capped at one minute.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }
}

/// Sends an HTTP request and returns the full response body.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`).
///
/// A body that fails mid-read is treated like a connection failure and the
/// whole request is retried under the same budget.
///
/// Does **not** retry HTTP 4xx (except 429); those are permanent.
///
/// # Errors
///
/// Returns [`SourceError`] once `policy.max_retries` retries have been
/// spent or the server answers with a non-retryable status.
#[allow(clippy::future_not_send)]
pub async fn send_bytes<F>(build_request: F, policy: &RetryPolicy) -> Result<Vec<u8>, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        let outcome = match send_once(&build_request).await {
            Ok(response) => {
                let url = response.url().to_string();
                match response.bytes().await {
                    Ok(body) => return Ok(body.to_vec()),
                    Err(e) => {
                        log::warn!("body read failed for {url}: {e}");
                        Attempt::Transient(SourceError::Http(e))
                    }
                }
            }
            Err(outcome) => outcome,
        };

        let err = match outcome {
            Attempt::Transient(err) if attempt < policy.max_retries => err,
            Attempt::Transient(err) | Attempt::Permanent(err) => return Err(err),
        };

        attempt += 1;
        let delay = policy.delay_for(attempt);
        log::warn!(
            "  retry {attempt}/{} in {delay:?} after: {err}",
            policy.max_retries
        );
        tokio::time::sleep(delay).await;
    }
}

/// Classification of a failed attempt.
enum Attempt {
    Transient(SourceError),
    Permanent(SourceError),
}

/// Sends the request once and classifies any failure.
#[allow(clippy::future_not_send)]
async fn send_once<F>(build_request: &F) -> Result<reqwest::Response, Attempt>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = match build_request().send().await {
        Ok(response) => response,
        Err(e) if is_transient(&e) => return Err(Attempt::Transient(SourceError::Http(e))),
        Err(e) => return Err(Attempt::Permanent(SourceError::Http(e))),
    };

    let status = response.status();
    let failure = || SourceError::Status {
        status,
        url: response.url().to_string(),
    };

    // 429 Too Many Requests and 5xx are worth another try
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(Attempt::Transient(failure()));
    }

    if status.is_client_error() {
        return Err(Attempt::Permanent(failure()));
    }

    Ok(response)
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::new(5).with_base_delay(Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(40);
        assert_eq!(policy.delay_for(30), MAX_DELAY);
    }

    /// Accepts connections on a local port, counting them. Each connection
    /// gets `response` and is closed, or is held open without an answer
    /// when `response` is `None`.
    async fn serve(response: Option<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request).await;
                match response {
                    Some(response) => {
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                    None => held.push(stream),
                }
            }
        });

        (format!("http://{addr}/data.csv"), accepted)
    }

    fn client(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder().timeout(timeout).build().unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2).with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn success_takes_one_attempt() {
        let (url, accepted) = serve(Some(
            "HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\na,b\r\n",
        ))
        .await;
        let client = client(Duration::from_secs(5));

        let body = send_bytes(|| client.get(&url), &policy()).await.unwrap();

        assert_eq!(body, b"a,b\r\n");
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_the_budget_is_spent() {
        let (url, accepted) = serve(Some(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ))
        .await;
        let client = client(Duration::from_secs(5));

        let result = send_bytes(|| client.get(&url), &policy()).await;

        assert!(matches!(
            result,
            Err(SourceError::Status { status, .. }) if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        ));
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, accepted) = serve(Some(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ))
        .await;
        let client = client(Duration::from_secs(5));

        let result = send_bytes(|| client.get(&url), &policy()).await;

        assert!(matches!(
            result,
            Err(SourceError::Status { status, .. }) if status == reqwest::StatusCode::NOT_FOUND
        ));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_are_retried() {
        let (url, accepted) = serve(None).await;
        let client = client(Duration::from_millis(200));

        let result = send_bytes(|| client.get(&url), &policy()).await;

        assert!(matches!(result, Err(SourceError::Http(e)) if e.is_timeout()));
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_host_fails_after_retries() {
        let client = client(Duration::from_millis(200));
        let policy = RetryPolicy::new(1).with_base_delay(Duration::from_millis(1));

        // Port 9 (discard) on localhost is closed in test environments.
        let result = send_bytes(|| client.get("http://127.0.0.1:9/data.csv"), &policy).await;

        assert!(matches!(result, Err(SourceError::Http(_))));
    }
}
