//! Threads: the remote, ordered message log a run operates on.

use foundry_runloop_core::client::ServiceClient;
use foundry_runloop_core::error::ServiceResult;
use serde::{Deserialize, Serialize};

use crate::models::{DeletionStatus, API_VERSION};

/// A request to create a new thread.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreadCreateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A conversation thread.
#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    pub id: String,

    /// Object type, always "thread".
    pub object: String,

    pub created_at: u64,
    pub metadata: Option<serde_json::Value>,
}

/// Create a new thread.
///
/// # Tracing
///
/// Emits a span named `foundry::threads::create`.
#[tracing::instrument(name = "foundry::threads::create", skip(client, metadata))]
pub async fn create(
    client: &ServiceClient,
    metadata: Option<serde_json::Value>,
) -> ServiceResult<Thread> {
    tracing::debug!("creating thread");

    let request = ThreadCreateRequest { metadata };
    let path = format!("/threads?{}", API_VERSION);
    let response = client.post(&path, &request).await?;
    let thread = response.json::<Thread>().await?;

    tracing::debug!(thread_id = %thread.id, "thread created");
    Ok(thread)
}

/// Get a thread by ID.
#[tracing::instrument(
    name = "foundry::threads::get",
    skip(client),
    fields(thread_id = %thread_id)
)]
pub async fn get(client: &ServiceClient, thread_id: &str) -> ServiceResult<Thread> {
    let path = format!("/threads/{}?{}", thread_id, API_VERSION);
    let response = client.get(&path).await?;
    Ok(response.json::<Thread>().await?)
}

/// Delete a thread.
///
/// # Tracing
///
/// Emits a span named `foundry::threads::delete` with field `thread_id`.
#[tracing::instrument(
    name = "foundry::threads::delete",
    skip(client),
    fields(thread_id = %thread_id)
)]
pub async fn delete(client: &ServiceClient, thread_id: &str) -> ServiceResult<DeletionStatus> {
    tracing::debug!("deleting thread");

    let path = format!("/threads/{}?{}", thread_id, API_VERSION);
    let response = client.delete(&path).await?;
    let result = response.json::<DeletionStatus>().await?;

    tracing::debug!(deleted = result.deleted, "thread deletion complete");
    Ok(result)
}
