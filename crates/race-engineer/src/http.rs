//! Shared HTTP plumbing: client construction and retry with backoff.
//!
//! Both the OpenF1 source and the Ollama client go through [`HttpClient`],
//! which maps non-success statuses to [`Error::HttpStatus`] and retries
//! transient failures with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Retry behaviour for remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from the `[http]` configuration section.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.http.max_retries,
            initial_delay: Duration::from_millis(config.http.initial_backoff_ms),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), doubling each time.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
///
/// Only errors for which [`Error::is_transient`] holds are retried.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    policy.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A JSON-over-HTTP client with retries.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpClient {
    /// Create a client using the configured timeout and retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("race-engineer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            inner,
            policy: RetryPolicy::from_config(config),
        })
    }

    /// GET `url` with query parameters and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or an
    /// undecodable body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let full = reqwest::Url::parse_with_params(url, query)
            .map_err(|e| Error::invalid_input(format!("bad URL {url}: {e}")))?;
        let full = &full;
        retry(&self.policy, url, || async move {
            debug!(url = %full, "GET");
            let response = self.inner.get(full.clone()).send().await?;
            decode(full.as_str(), response).await
        })
        .await
    }

    /// POST a JSON body to `url` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or an
    /// undecodable body.
    pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        retry(&self.policy, url, || async move {
            debug!(url, "POST");
            let response = self.inner.post(url).json(body).send().await?;
            decode(url, response).await
        })
        .await
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn transient() -> Error {
        Error::HttpStatus {
            url: "http://test".to_string(),
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = Config::default();
        config.http.max_retries = 7;
        config.http.initial_backoff_ms = 50;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry(&fast_policy(3), "op", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&fast_policy(2), "op", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&fast_policy(3), "op", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::invalid_input("nope"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let mut s = "ééé".to_string();
        truncate_on_char_boundary(&mut s, 3);
        assert_eq!(s, "é");

        let mut short = "ok".to_string();
        truncate_on_char_boundary(&mut short, 10);
        assert_eq!(short, "ok");
    }

    #[test]
    fn test_client_from_config() {
        assert!(HttpClient::from_config(&Config::default()).is_ok());
    }

    fn test_client(max_retries: u32) -> HttpClient {
        let mut config = Config::default();
        config.http.max_retries = max_retries;
        config.http.initial_backoff_ms = 1;
        HttpClient::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_get_json_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/laps"))
            .and(query_param("session_key", "9472"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"lap_number": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/laps", server.uri());
        let body: serde_json::Value = test_client(0)
            .get_json(&url, &[("session_key", "9472".to_string())])
            .await
            .unwrap();
        assert_eq!(body, json!([{"lap_number": 1}]));
    }

    #[tokio::test]
    async fn test_get_json_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let url = format!("{}/sessions", server.uri());
        let body: Vec<serde_json::Value> = test_client(2).get_json(&url, &[]).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_get_json_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meetings"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
            .mount(&server)
            .await;

        let url = format!("{}/meetings", server.uri());
        let err = test_client(2)
            .get_json::<serde_json::Value>(&url, &[])
            .await
            .unwrap_err();
        match err {
            Error::HttpStatus { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such thing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
