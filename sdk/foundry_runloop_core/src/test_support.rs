//! Helpers for tests in sibling crates. Enabled by the `test-support` feature.

use std::time::Duration;

use wiremock::MockServer;

use crate::auth::ServiceCredential;
use crate::client::{RetryPolicy, ServiceClient};

/// API key sent by [`mock_client`] (not a real key).
pub const TEST_API_KEY: &str = "test-api-key";

/// Build a client pointed at `server` with millisecond retry backoff.
pub fn mock_client(server: &MockServer) -> ServiceClient {
    ServiceClient::builder()
        .endpoint(server.uri())
        .credential(ServiceCredential::api_key(TEST_API_KEY))
        .retry_policy(RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
        })
        .build()
        .expect("mock server uri is a valid endpoint")
}
