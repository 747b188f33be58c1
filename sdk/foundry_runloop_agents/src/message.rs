//! Messages within a thread.
//!
//! Users append messages before a run; the agent appends its replies while
//! the run executes. Read replies only after the run has completed; the
//! [`driver`](crate::driver) returns a [`RunOutcome`](crate::driver::RunOutcome)
//! exactly at that point.

use foundry_runloop_core::client::ServiceClient;
use foundry_runloop_core::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};

use crate::models::{ListPage, API_VERSION};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A request to add a message to a thread.
#[derive(Debug, Clone, Serialize)]
pub struct MessageCreateRequest {
    pub role: MessageRole,
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Builder for [`MessageCreateRequest`].
#[derive(Debug, Default)]
pub struct MessageCreateRequestBuilder {
    content: Option<String>,
    role: Option<MessageRole>,
    metadata: Option<serde_json::Value>,
}

impl MessageCreateRequest {
    pub fn builder() -> MessageCreateRequestBuilder {
        MessageCreateRequestBuilder::default()
    }

    /// Shorthand for a user message with the given text.
    pub fn user(content: impl Into<String>) -> ServiceResult<Self> {
        Self::builder().content(content).build()
    }
}

impl MessageCreateRequestBuilder {
    /// Set the message text. **Required.**
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the role. Defaults to [`MessageRole::User`].
    pub fn role(mut self, role: MessageRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> ServiceResult<MessageCreateRequest> {
        let content = self
            .content
            .ok_or_else(|| ServiceError::Builder("content is required".into()))?;

        if content.trim().is_empty() {
            return Err(ServiceError::Builder("content cannot be empty".into()));
        }

        Ok(MessageCreateRequest {
            role: self.role.unwrap_or(MessageRole::User),
            content,
            metadata: self.metadata,
        })
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// The author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A message in a thread.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,

    /// Object type, always "thread.message".
    pub object: String,

    pub created_at: u64,
    pub thread_id: String,
    pub role: MessageRole,

    #[serde(default)]
    pub content: Vec<MessageContent>,

    pub assistant_id: Option<String>,

    /// Run that produced this message, if any.
    pub run_id: Option<String>,

    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// All text parts of the message joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.text.as_ref())
            .map(|text| text.value.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One part of a message's content.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageContent {
    /// The type of content (e.g., "text", "image_file").
    #[serde(rename = "type")]
    pub content_type: String,

    pub text: Option<TextContent>,
}

/// Text content within a message.
#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    pub value: String,

    /// Citations and file references.
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
}

/// Response from listing messages.
pub type MessageList = ListPage<Message>;

impl MessageList {
    /// Texts of the assistant messages, in list order.
    pub fn assistant_text(&self) -> Vec<String> {
        self.data
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .map(Message::text)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// API functions
// ---------------------------------------------------------------------------

/// Add a message to a thread.
///
/// # Tracing
///
/// Emits a span named `foundry::messages::create` with field `thread_id`.
#[tracing::instrument(
    name = "foundry::messages::create",
    skip(client, request),
    fields(thread_id = %thread_id)
)]
pub async fn create(
    client: &ServiceClient,
    thread_id: &str,
    request: &MessageCreateRequest,
) -> ServiceResult<Message> {
    tracing::debug!("creating message");

    let path = format!("/threads/{}/messages?{}", thread_id, API_VERSION);
    let response = client.post(&path, request).await?;
    let message = response.json::<Message>().await?;

    tracing::debug!(message_id = %message.id, "message created");
    Ok(message)
}

/// List messages in a thread, newest first (the service default).
#[tracing::instrument(
    name = "foundry::messages::list",
    skip(client),
    fields(thread_id = %thread_id)
)]
pub async fn list(client: &ServiceClient, thread_id: &str) -> ServiceResult<MessageList> {
    let path = format!("/threads/{}/messages?{}", thread_id, API_VERSION);
    let response = client.get(&path).await?;
    let list = response.json::<MessageList>().await?;

    tracing::debug!(count = list.data.len(), "messages listed");
    Ok(list)
}

/// List the messages a run appended, oldest first.
///
/// # Tracing
///
/// Emits a span named `foundry::messages::list_for_run` with fields
/// `thread_id` and `run_id`.
#[tracing::instrument(
    name = "foundry::messages::list_for_run",
    skip(client),
    fields(thread_id = %thread_id, run_id = %run_id)
)]
pub async fn list_for_run(
    client: &ServiceClient,
    thread_id: &str,
    run_id: &str,
) -> ServiceResult<MessageList> {
    let path = format!(
        "/threads/{}/messages?{}&order=asc&run_id={}",
        thread_id, API_VERSION, run_id
    );
    let response = client.get(&path).await?;
    let list = response.json::<MessageList>().await?;

    tracing::debug!(count = list.data.len(), "run messages listed");
    Ok(list)
}

/// Get a single message.
#[tracing::instrument(
    name = "foundry::messages::get",
    skip(client),
    fields(thread_id = %thread_id, message_id = %message_id)
)]
pub async fn get(
    client: &ServiceClient,
    thread_id: &str,
    message_id: &str,
) -> ServiceResult<Message> {
    let path = format!(
        "/threads/{}/messages/{}?{}",
        thread_id, message_id, API_VERSION
    );
    let response = client.get(&path).await?;
    Ok(response.json::<Message>().await?)
}
