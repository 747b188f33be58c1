//! HTTP client for the Azure AI Foundry Agent Service.
//!
//! [`ServiceClient`] is the opaque handle every remote operation goes
//! through. It owns the HTTP transport, the credential, and the retry policy
//! for transient failures.
//!
//! # Examples
//!
//! ```rust,no_run
//! use foundry_runloop_core::client::{RetryPolicy, ServiceClient};
//! use foundry_runloop_core::auth::ServiceCredential;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ServiceClient::builder()
//!     .endpoint("https://your-resource.services.ai.azure.com/api/projects/your-project")
//!     .credential(ServiceCredential::api_key("your-key"))
//!     .retry_policy(RetryPolicy {
//!         max_retries: 5,
//!         initial_backoff: Duration::from_millis(250),
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::auth::ServiceCredential;
use crate::error::{ServiceError, ServiceResult};
use reqwest::Client as HttpClient;
use url::Url;

use std::time::Duration;

/// Default API version header sent with every request.
pub const DEFAULT_API_VERSION: &str = "2025-05-01";

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read/response timeout (60 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable consulted when no endpoint is given to the builder.
pub const ENDPOINT_ENV: &str = "AZURE_AI_FOUNDRY_ENDPOINT";

/// Maximum length for error messages placed in a [`ServiceError`].
const MAX_ERROR_MESSAGE_LEN: usize = 1000;

const REDACTED: &str = "[REDACTED]";

/// Determines if an HTTP status code represents a retriable error.
///
/// - 429 Too Many Requests
/// - 500 Internal Server Error
/// - 502 Bad Gateway
/// - 503 Service Unavailable
/// - 504 Gateway Timeout
#[inline]
pub fn is_retriable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Automatic retry behaviour for transient HTTP errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial request).
    pub max_retries: u32,
    /// Backoff before the first retry. Attempt `n` waits `2^n * initial_backoff`,
    /// scaled by a random jitter factor in `[0.75, 1.25]`.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff * 2_u32.saturating_pow(attempt);
        let jitter = 0.75 + fastrand::f64() * 0.5;
        base.mul_f64(jitter)
    }
}

/// Authenticated handle to an Agent Service project endpoint.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: HttpClient,
    endpoint: Url,
    credential: ServiceCredential,
    api_version: String,
    retry_policy: RetryPolicy,
}

/// Builder for [`ServiceClient`].
#[derive(Debug, Default)]
pub struct ServiceClientBuilder {
    endpoint: Option<String>,
    credential: Option<ServiceCredential>,
    api_version: Option<String>,
    http_client: Option<HttpClient>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl ServiceClient {
    /// Create a new builder.
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::default()
    }

    /// The base endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The API version sent with each request.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// The retry policy for transient errors.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Build a full URL for an API path.
    ///
    /// The path is appended to the endpoint's own path, so project-scoped
    /// endpoints (`.../api/projects/<name>`) keep their prefix.
    pub fn url(&self, path: &str) -> ServiceResult<Url> {
        let mut base = self.endpoint.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| ServiceError::invalid_endpoint_with_source("failed to construct URL", e))
    }

    /// Send a GET request, retrying transient failures.
    pub async fn get(&self, path: &str) -> ServiceResult<reqwest::Response> {
        self.send_with_retry(path, |http, url| http.get(url)).await
    }

    /// Send a POST request with a JSON body, retrying transient failures.
    pub async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> ServiceResult<reqwest::Response> {
        // Serialize once so a bad payload fails before any network traffic.
        let payload = serde_json::to_vec(body)?;
        self.send_with_retry(path, |http, url| {
            http.post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.clone())
        })
        .await
    }

    /// Send a DELETE request, retrying transient failures.
    pub async fn delete(&self, path: &str) -> ServiceResult<reqwest::Response> {
        self.send_with_retry(path, |http, url| http.delete(url)).await
    }

    async fn send_with_retry<F>(&self, path: &str, build: F) -> ServiceResult<reqwest::Response>
    where
        F: Fn(&HttpClient, Url) -> reqwest::RequestBuilder,
    {
        let url = self.url(path)?;
        let auth = self.credential.resolve().await?;
        let mut attempt = 0u32;

        loop {
            let response = build(&self.http, url.clone())
                .header(reqwest::header::AUTHORIZATION, &auth)
                .header("api-version", &self.api_version)
                .send()
                .await?;

            if response.status().is_success() {
                return Ok(response);
            }

            let status = response.status().as_u16();
            if !is_retriable_status(status) || attempt >= self.retry_policy.max_retries {
                return Err(Self::error_from_response(response).await);
            }

            let backoff = self.retry_policy.backoff(attempt);
            tracing::debug!(status, attempt, ?backoff, "retrying after transient error");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// Convert a non-success response into a [`ServiceError`].
    async fn error_from_response(response: reqwest::Response) -> ServiceError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(err_obj) = value.get("error") {
                let code = err_obj
                    .get("code")
                    .and_then(|c| c.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let message = err_obj
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or(&body);
                return ServiceError::Api {
                    code,
                    message: truncate_message(message),
                };
            }
        }

        ServiceError::http(status, truncate_message(&body))
    }
}

fn is_secret_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '"' | '\'' | ',')
}

/// Replace the secret following each `marker` with `[REDACTED]`.
fn redact_after(input: &str, marker: &str, keep_marker: bool, word_start: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find(marker) {
        let (head, tail) = rest.split_at(pos);
        let secret = &tail[marker.len()..];
        let end = secret.find(is_secret_delimiter).unwrap_or(secret.len());
        let at_word_start = !word_start
            || head
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric());

        out.push_str(head);
        if end == 0 || !at_word_start {
            out.push_str(marker);
        } else {
            if keep_marker {
                out.push_str(marker);
            }
            out.push_str(REDACTED);
        }
        rest = if end == 0 || !at_word_start {
            secret
        } else {
            &secret[end..]
        };
    }

    out.push_str(rest);
    out
}

/// Remove bearer tokens and `sk-` style keys from a message.
pub(crate) fn sanitize_error_message(msg: &str) -> String {
    let without_bearer = redact_after(msg, "Bearer ", true, false);
    redact_after(&without_bearer, "sk-", false, true)
}

/// Sanitize, then cap the message at [`MAX_ERROR_MESSAGE_LEN`] bytes on a char boundary.
pub(crate) fn truncate_message(msg: &str) -> String {
    let sanitized = sanitize_error_message(msg);
    if sanitized.len() <= MAX_ERROR_MESSAGE_LEN {
        return sanitized;
    }

    let mut cut = MAX_ERROR_MESSAGE_LEN;
    while !sanitized.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... (truncated)", &sanitized[..cut])
}

impl ServiceClientBuilder {
    /// Set the project endpoint URL.
    ///
    /// If not set, [`ENDPOINT_ENV`] is consulted at build time.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the credential. Defaults to [`ServiceCredential::from_env()`].
    pub fn credential(mut self, credential: ServiceCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Set the API version. Defaults to [`DEFAULT_API_VERSION`].
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Use a preconfigured HTTP client.
    ///
    /// **Note:** timeouts set on this builder are ignored when a custom
    /// client is supplied.
    pub fn http_client(mut self, client: HttpClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the read timeout covering the whole request/response cycle.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the retry policy. Defaults to 3 retries with 500ms initial backoff.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Build the [`ServiceClient`].
    ///
    /// # Errors
    ///
    /// - [`ServiceError::MissingConfig`] if no endpoint is set and [`ENDPOINT_ENV`] is unset
    /// - [`ServiceError::InvalidEndpoint`] if the endpoint does not parse
    /// - [`ServiceError::Request`] if the HTTP client cannot be constructed
    pub fn build(self) -> ServiceResult<ServiceClient> {
        let http = match self.http_client {
            Some(http) => http,
            None => reqwest::Client::builder()
                .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
                .timeout(self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT))
                .build()?,
        };

        let endpoint_str = self
            .endpoint
            .or_else(|| std::env::var(ENDPOINT_ENV).ok())
            .ok_or_else(|| {
                ServiceError::MissingConfig(format!(
                    "endpoint is required. Set it via builder or {ENDPOINT_ENV} env var."
                ))
            })?;

        let endpoint = Url::parse(&endpoint_str)
            .map_err(|e| ServiceError::invalid_endpoint_with_source("invalid endpoint URL", e))?;

        let credential = match self.credential {
            Some(credential) => credential,
            None => ServiceCredential::from_env()?,
        };

        Ok(ServiceClient {
            http,
            endpoint,
            credential,
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            retry_policy: self.retry_policy.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(5),
        }
    }

    async fn setup_mock_client(server: &MockServer) -> ServiceClient {
        ServiceClient::builder()
            .endpoint(server.uri())
            .credential(ServiceCredential::api_key("test-key"))
            .retry_policy(fast_retry())
            .build()
            .expect("should build client")
    }

    // --- Builder ---

    #[test]
    #[serial]
    fn builder_requires_endpoint() {
        std::env::remove_var(ENDPOINT_ENV);

        let result = ServiceClient::builder()
            .credential(ServiceCredential::api_key("test"))
            .build();

        assert!(matches!(result.unwrap_err(), ServiceError::MissingConfig(_)));
    }

    #[test]
    #[serial]
    fn builder_uses_endpoint_from_env() {
        let original = std::env::var(ENDPOINT_ENV).ok();
        std::env::set_var(ENDPOINT_ENV, "https://env.services.ai.azure.com");

        let client = ServiceClient::builder()
            .credential(ServiceCredential::api_key("test"))
            .build()
            .expect("should build");

        assert_eq!(
            client.endpoint().as_str(),
            "https://env.services.ai.azure.com/"
        );

        match original {
            Some(val) => std::env::set_var(ENDPOINT_ENV, val),
            None => std::env::remove_var(ENDPOINT_ENV),
        }
    }

    #[test]
    fn builder_rejects_invalid_endpoint() {
        let result = ServiceClient::builder()
            .endpoint("not a url")
            .credential(ServiceCredential::api_key("test"))
            .build();

        assert!(matches!(
            result.unwrap_err(),
            ServiceError::InvalidEndpoint { .. }
        ));
    }

    #[test]
    fn builder_defaults() {
        let client = ServiceClient::builder()
            .endpoint("https://test.services.ai.azure.com")
            .credential(ServiceCredential::api_key("test"))
            .build()
            .expect("should build");

        assert_eq!(client.api_version(), DEFAULT_API_VERSION);
        assert_eq!(client.retry_policy().max_retries, 3);
        assert_eq!(
            client.retry_policy().initial_backoff,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn url_keeps_project_prefix() {
        let client = ServiceClient::builder()
            .endpoint("https://test.services.ai.azure.com/api/projects/demo")
            .credential(ServiceCredential::api_key("test"))
            .build()
            .expect("should build");

        let url = client.url("/threads?api-version=v1").expect("valid url");
        assert_eq!(
            url.as_str(),
            "https://test.services.ai.azure.com/api/projects/demo/threads?api-version=v1"
        );
    }

    #[test]
    fn url_joins_root_endpoint() {
        let client = ServiceClient::builder()
            .endpoint("https://test.services.ai.azure.com")
            .credential(ServiceCredential::api_key("test"))
            .build()
            .expect("should build");

        let url = client.url("assistants").expect("valid url");
        assert_eq!(
            url.as_str(),
            "https://test.services.ai.azure.com/assistants"
        );
    }

    // --- Requests ---

    #[tokio::test]
    async fn get_sends_auth_and_api_version() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("Authorization", "Bearer test-key"))
            .and(header("api-version", DEFAULT_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .expect(1)
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let response = client.get("/ping").await.expect("should succeed");

        assert_eq!(response.text().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"hello": "world"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        client
            .post("/echo", &serde_json::json!({"hello": "world"}))
            .await
            .expect("should succeed");
    }

    #[tokio::test]
    async fn delete_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/things/1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        client.delete("/things/1").await.expect("should succeed");
    }

    #[tokio::test]
    async fn structured_error_body_becomes_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"code": "not_found", "message": "No thread found"}
            })))
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let err = client.get("/missing").await.unwrap_err();

        match err {
            ServiceError::Api { code, message } => {
                assert_eq!(code, "not_found");
                assert_eq!(message, "No thread found");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_error_body_becomes_http_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/teapot"))
            .respond_with(ResponseTemplate::new(418).set_body_string("short and stout"))
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let err = client.get("/teapot").await.unwrap_err();

        match err {
            ServiceError::Http { status, message } => {
                assert_eq!(status, 418);
                assert_eq!(message, "short and stout");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    // --- Retry ---

    #[tokio::test]
    async fn get_retries_on_503_then_succeeds() {
        let server = MockServer::start().await;
        let request_count = Arc::new(AtomicU32::new(0));
        let counter = request_count.clone();

        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(move |_req: &wiremock::Request| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let result = client.get("/flaky").await;

        assert!(result.is_ok(), "expected success after retries: {result:?}");
        assert_eq!(request_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn post_gives_up_after_max_retries() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(4)
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let err = client
            .post("/busy", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Http { status: 429, .. }));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn retries_are_logged() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let _ = client.get("/down").await;

        assert!(logs_contain("retrying after transient error"));
    }

    #[tokio::test]
    async fn non_retriable_status_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        assert!(client.get("/bad").await.is_err());
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        };

        for attempt in 0..3 {
            let base = 100.0 * f64::from(2_u32.pow(attempt));
            let ms = policy.backoff(attempt).as_secs_f64() * 1000.0;
            assert!(ms >= base * 0.75 - 0.001 && ms <= base * 1.25 + 0.001);
        }
    }

    // --- Sanitization ---

    #[test]
    fn sanitize_removes_bearer_tokens() {
        let out = sanitize_error_message("Invalid token: Bearer abc.def.ghi, try again");
        assert_eq!(out, "Invalid token: Bearer [REDACTED], try again");
    }

    #[test]
    fn sanitize_removes_sk_keys() {
        let out = sanitize_error_message("Invalid API key: sk-proj1234567890");
        assert_eq!(out, "Invalid API key: [REDACTED]");
    }

    #[test]
    fn sanitize_handles_multiple_and_nested_secrets() {
        let out = sanitize_error_message("Bearer sk-1234 and Bearer tok2 and sk-5678");
        assert!(!out.contains("1234"));
        assert!(!out.contains("tok2"));
        assert!(!out.contains("5678"));
        assert_eq!(out.matches(REDACTED).count(), 3);
    }

    #[test]
    fn sanitize_preserves_ordinary_text() {
        let msg = "The model deployment 'gpt-4o' was not found; task-force notified";
        assert_eq!(sanitize_error_message(msg), msg);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let msg = "é".repeat(MAX_ERROR_MESSAGE_LEN);
        let out = truncate_message(&msg);

        assert!(out.ends_with("... (truncated)"));
        assert!(out.len() <= MAX_ERROR_MESSAGE_LEN + "... (truncated)".len());
    }

    #[tokio::test]
    async fn error_bodies_are_sanitized() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/leaky"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"code": "Unauthorized", "message": "Invalid token: Bearer sk-1234567890abcdef"}
            })))
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let err = client.get("/leaky").await.unwrap_err().to_string();

        assert!(!err.contains("sk-1234567890abcdef"), "leaked: {err}");
        assert!(err.contains(REDACTED));
    }
}
