use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// No retries at all; the first failure is returned to the caller.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32
            .checked_shl(u32::try_from(attempt_index).unwrap_or(u32::MAX))
            .unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_concurrency: 16,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("http client is shut down")]
    Closed,
}

/// JSON-over-HTTP client shared by the upstream adapters.
///
/// Bounds in-flight requests, applies the configured timeout and retries
/// transport failures and retryable statuses with capped exponential backoff.
#[derive(Debug)]
pub struct HttpFetcher {
    upstream: &'static str,
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(upstream: &'static str, config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            upstream,
            client: builder.build()?,
            limit: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<Value, FetchError> {
        self.send_with_retries(url, || self.client.get(url).query(query))
            .await
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<Value, FetchError> {
        self.send_with_retries(url, || {
            headers
                .iter()
                .fold(self.client.post(url), |req, (name, value)| req.header(*name, *value))
                .json(body)
        })
        .await
    }

    async fn send_with_retries<F>(&self, url: &str, build: F) -> Result<Value, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let _permit = self.limit.acquire().await.map_err(|_| FetchError::Closed)?;
        let span = info_span!("http_fetch", upstream = self.upstream, url);

        async {
            let mut attempt = 0usize;
            loop {
                match build().send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        if status.is_success() {
                            return Ok(resp.json::<Value>().await?);
                        }

                        let final_url = resp.url().to_string();
                        if classify_status(status) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            warn!(%status, attempt, "retryable upstream status");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }

                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            warn!(error = %err, attempt, "retryable transport error");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(FetchError::Request(err));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{extract::State, http::StatusCode as AxumStatus, routing::get, Json, Router};
    use serde_json::json;

    use crate::tests::spawn_stub;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn status_classification_retries_only_transient_failures() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            RetryDisposition::NonRetryable
        );
    }

    fn fast_retries(max_retries: usize) -> HttpClientConfig {
        HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..Default::default()
        }
    }

    async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> (AxumStatus, Json<Value>) {
        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
            (AxumStatus::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
        } else {
            (AxumStatus::OK, Json(json!({"ok": true})))
        }
    }

    #[tokio::test]
    async fn retryable_status_is_retried_until_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base =
            spawn_stub(Router::new().route("/flaky", get(flaky)).with_state(hits.clone())).await;

        let fetcher = HttpFetcher::new("test", fast_retries(2)).expect("client");
        let value = fetcher
            .get_json(&format!("{base}/flaky"), &[])
            .await
            .expect("second attempt succeeds");
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn without_retries_the_first_failure_is_returned() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base =
            spawn_stub(Router::new().route("/flaky", get(flaky)).with_state(hits.clone())).await;

        let fetcher = HttpFetcher::new("test", fast_retries(0)).expect("client");
        let err = fetcher
            .get_json(&format!("{base}/flaky"), &[])
            .await
            .expect_err("no retry");
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
