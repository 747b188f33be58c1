//! Shared types for the Agent Service resources.

use serde::Deserialize;

/// API version query parameter for all Agent Service requests.
pub(crate) const API_VERSION: &str = "api-version=v1";

/// Response body of every `DELETE` on an agent or thread.
#[derive(Debug, Clone, Deserialize)]
pub struct DeletionStatus {
    /// ID of the deleted resource.
    pub id: String,

    /// Object type, e.g. "assistant.deleted" or "thread.deleted".
    pub object: String,

    /// Whether the deletion was successful.
    pub deleted: bool,
}

/// A page of resources as returned by the list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage<T> {
    /// Object type, always "list".
    pub object: String,

    pub data: Vec<T>,

    pub first_id: Option<String>,
    pub last_id: Option<String>,

    /// Whether there are more items past `last_id`.
    #[serde(default)]
    pub has_more: bool,
}
