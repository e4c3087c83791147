//! HTTP transport for the Honeycomb API.
//!
//! [`ApiClient`] owns the underlying connection pool, the credential, and the
//! retry policy. Every request carries the team credential header; transient
//! statuses (429 and the 5xx gateway set) are retried with bounded backoff,
//! honoring `Retry-After` on rate limits.

pub mod backoff;
pub mod resources;

use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use url::Url;

use crate::error::{HnyError, Result};

/// Header carrying the API credential.
const TEAM_HEADER: &str = "X-Honeycomb-Team";

/// Statuses that are retried before giving up.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Response from an API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as a string
    pub body: String,
}

impl ApiResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Retry behavior for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Base backoff for non-429 retryable statuses (exponentially increased)
    pub base_backoff: Duration,
    /// Ceiling for the exponential backoff
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff for a given retry attempt: base * 2^attempt, capped.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_backoff)
    }
}

/// Client for the Honeycomb API.
///
/// Explicitly constructed and passed by reference to every component; there is
/// no ambient global session. Cloning is cheap (the reqwest client is an
/// internal handle to a shared pool).
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Create a client against a versioned base URL (e.g.
    /// `https://api.honeycomb.io/1/`). The trailing slash matters: endpoints
    /// are joined onto it.
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy (mainly for tests and aggressive tooling).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The base URL this client targets.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Execute a request against `endpoint` (relative to the base URL),
    /// retrying transient statuses per the policy.
    ///
    /// Returns the first 2xx response. Any other status, after retries are
    /// exhausted, surfaces as [`HnyError::Api`] carrying the response body.
    #[tracing::instrument(skip(self, body), fields(method = %method, endpoint = %endpoint))]
    pub async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| HnyError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;

        let mut attempt: u32 = 0;
        loop {
            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .header(TEAM_HEADER, &self.api_key);
            if let Some(json) = body {
                req = req.json(json);
            }

            let response = req.send().await?;
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let text = response.text().await?;

            if (200..300).contains(&status) {
                tracing::debug!(status, "Request completed");
                return Ok(ApiResponse { status, body: text });
            }

            if RETRYABLE_STATUSES.contains(&status) && attempt < self.retry.max_retries {
                let wait = if status == 429 {
                    Duration::from_secs(backoff::resolve_retry_after(
                        retry_after.as_deref(),
                        Utc::now(),
                    ))
                } else {
                    self.retry.backoff_for(attempt)
                };
                tracing::warn!(
                    status,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    "Retryable API error, backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            tracing::debug!(status, body = %text, "Request failed");
            return Err(HnyError::Api { status, body: text });
        }
    }

    /// GET an endpoint and deserialize the JSON body.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.send(Method::GET, endpoint, None).await?.json()
    }

    /// POST a JSON body to an endpoint and deserialize the JSON response.
    pub async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        self.send(Method::POST, endpoint, Some(body)).await?.json()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Client pointed at a wiremock server with backoff short enough for tests.
    pub fn test_client(server_uri: &str, api_key: &str) -> ApiClient {
        let base = Url::parse(&format!("{server_uri}/1/")).unwrap();
        ApiClient::new(base, api_key).with_retry_policy(RetryPolicy {
            max_retries: 4,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_client;
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn attaches_credential_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/auth"))
            .and(header("X-Honeycomb-Team", "hcaik_test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), "hcaik_test");
        let response = client.send(Method::GET, "auth", None).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/datasets"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/datasets"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), "k");
        let response = client.send(Method::GET, "datasets", None).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "[]");
    }

    #[tokio::test]
    async fn honors_retry_after_on_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/datasets"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/datasets"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), "k");
        let response = client.send(Method::GET, "datasets", None).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/datasets"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(5) // initial attempt + 4 retries
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), "k");
        let err = client.send(Method::GET, "datasets", None).await.unwrap_err();
        match err {
            HnyError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/datasets/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), "k");
        let err = client
            .send(Method::GET, "datasets/missing", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
