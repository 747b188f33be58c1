//! Runs: a remote execution of an agent against a thread.
//!
//! A run moves through
//! `queued → in_progress → {requires_action ⇄ in_progress} → terminal`.
//! While it is `requires_action` the service waits for the caller to submit
//! tool outputs (function tools) or approvals (MCP tools). This module holds
//! the wire types and the individual REST calls; the polling loop lives in
//! [`driver`](crate::driver).

use foundry_runloop_core::client::ServiceClient;
use foundry_runloop_core::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};

use crate::agent::validate_sampling;
use crate::models::API_VERSION;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A request to create a run on an existing thread.
#[derive(Debug, Clone, Serialize)]
pub struct RunCreateRequest {
    /// The agent to run.
    pub assistant_id: String,

    /// Replace the agent's instructions for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Appended to the agent's instructions for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_prompt_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
}

/// Builder for [`RunCreateRequest`].
#[derive(Debug, Default)]
pub struct RunCreateRequestBuilder {
    assistant_id: Option<String>,
    instructions: Option<String>,
    additional_instructions: Option<String>,
    metadata: Option<serde_json::Value>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_prompt_tokens: Option<u32>,
    max_completion_tokens: Option<u32>,
}

impl RunCreateRequest {
    pub fn builder() -> RunCreateRequestBuilder {
        RunCreateRequestBuilder::default()
    }

    /// A request that runs `assistant_id` with no overrides.
    pub fn for_agent(assistant_id: impl Into<String>) -> ServiceResult<Self> {
        Self::builder().assistant_id(assistant_id).build()
    }
}

impl RunCreateRequestBuilder {
    /// Set the agent to run. **Required.**
    pub fn assistant_id(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn additional_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.additional_instructions = Some(instructions.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn max_prompt_tokens(mut self, tokens: u32) -> Self {
        self.max_prompt_tokens = Some(tokens);
        self
    }

    pub fn max_completion_tokens(mut self, tokens: u32) -> Self {
        self.max_completion_tokens = Some(tokens);
        self
    }

    pub fn build(self) -> ServiceResult<RunCreateRequest> {
        let assistant_id = self
            .assistant_id
            .ok_or_else(|| ServiceError::Builder("assistant_id is required".into()))?;

        if assistant_id.trim().is_empty() {
            return Err(ServiceError::Builder("assistant_id cannot be empty".into()));
        }

        validate_sampling(self.temperature, self.top_p)?;

        Ok(RunCreateRequest {
            assistant_id,
            instructions: self.instructions,
            additional_instructions: self.additional_instructions,
            metadata: self.metadata,
            temperature: self.temperature,
            top_p: self.top_p,
            max_prompt_tokens: self.max_prompt_tokens,
            max_completion_tokens: self.max_completion_tokens,
        })
    }
}

/// Create a thread and a run in a single call.
#[derive(Debug, Clone, Serialize)]
pub struct CreateThreadAndRunRequest {
    pub assistant_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadSeed>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Initial contents of a thread created together with its run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreadSeed {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<SeedMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A message placed in a new thread.
#[derive(Debug, Clone, Serialize)]
pub struct SeedMessage {
    pub role: String,
    pub content: String,
}

/// Builder for [`CreateThreadAndRunRequest`].
#[derive(Debug, Default)]
pub struct CreateThreadAndRunRequestBuilder {
    assistant_id: Option<String>,
    messages: Vec<SeedMessage>,
    thread_metadata: Option<serde_json::Value>,
    instructions: Option<String>,
    run_metadata: Option<serde_json::Value>,
}

impl CreateThreadAndRunRequest {
    pub fn builder() -> CreateThreadAndRunRequestBuilder {
        CreateThreadAndRunRequestBuilder::default()
    }
}

impl CreateThreadAndRunRequestBuilder {
    pub fn assistant_id(mut self, id: impl Into<String>) -> Self {
        self.assistant_id = Some(id.into());
        self
    }

    /// Add an initial user message.
    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(SeedMessage {
            role: "user".into(),
            content: content.into(),
        });
        self
    }

    pub fn thread_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.thread_metadata = Some(metadata);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn run_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.run_metadata = Some(metadata);
        self
    }

    pub fn build(self) -> ServiceResult<CreateThreadAndRunRequest> {
        let assistant_id = self
            .assistant_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ServiceError::Builder("assistant_id is required".into()))?;

        let thread = (!self.messages.is_empty() || self.thread_metadata.is_some()).then(|| {
            ThreadSeed {
                messages: self.messages,
                metadata: self.thread_metadata,
            }
        });

        Ok(CreateThreadAndRunRequest {
            assistant_id,
            thread,
            instructions: self.instructions,
            metadata: self.run_metadata,
        })
    }
}

/// The result of one local tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// An approve/deny decision for one MCP tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolApproval {
    pub tool_call_id: String,
    pub approve: bool,
}

#[derive(Debug, Serialize)]
struct SubmitToolOutputsRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_outputs: Option<&'a [ToolOutput]>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_approvals: Option<&'a [ToolApproval]>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// The status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    /// Waiting for tool outputs or approvals from the caller.
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    /// Stopped early, e.g. a token limit was hit.
    Incomplete,
    Expired,
}

impl RunStatus {
    /// Whether the service will never change this status again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired | Self::Incomplete
        )
    }

    /// Whether a poll may observe `next` after `self`.
    ///
    /// Polls can skip intermediate states, so this checks reachability
    /// rather than single steps.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            s if s.is_terminal() => false,
            Self::Queued => true,
            // Submitting tool outputs re-queues the run.
            Self::RequiresAction => true,
            Self::InProgress => next != Self::Queued,
            Self::Cancelling => next.is_terminal(),
            _ => false,
        }
    }

    /// The wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run on a thread.
#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,

    /// Object type, always "thread.run".
    pub object: String,

    pub created_at: u64,
    pub thread_id: String,
    pub assistant_id: String,
    pub status: RunStatus,

    /// Present while `status` is `requires_action`.
    pub required_action: Option<RequiredAction>,

    /// Remote error detail for failed runs.
    pub last_error: Option<LastError>,

    pub started_at: Option<u64>,
    pub expires_at: Option<u64>,
    pub cancelled_at: Option<u64>,
    pub failed_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub usage: Option<RunUsage>,
    pub metadata: Option<serde_json::Value>,
}

/// What the service needs from the caller before the run can continue.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequiredAction {
    /// Execute function tools locally and submit their outputs.
    SubmitToolOutputs { submit_tool_outputs: PendingToolCalls },

    /// Approve or deny MCP tool calls.
    SubmitToolApproval { submit_tool_approval: PendingToolCalls },
}

impl RequiredAction {
    pub fn tool_calls(&self) -> &[RequiredToolCall] {
        match self {
            Self::SubmitToolOutputs {
                submit_tool_outputs: pending,
            }
            | Self::SubmitToolApproval {
                submit_tool_approval: pending,
            } => &pending.tool_calls,
        }
    }
}

/// The tool calls attached to a [`RequiredAction`].
#[derive(Debug, Clone, Deserialize)]
pub struct PendingToolCalls {
    pub tool_calls: Vec<RequiredToolCall>,
}

/// A single pending tool call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequiredToolCall {
    Function { id: String, function: FunctionCall },
    Mcp {
        id: String,
        name: String,
        #[serde(default)]
        arguments: String,
        server_label: String,
    },
}

impl RequiredToolCall {
    pub fn id(&self) -> &str {
        match self {
            Self::Function { id, .. } | Self::Mcp { id, .. } => id,
        }
    }

    /// The name of the function or MCP tool being called.
    pub fn name(&self) -> &str {
        match self {
            Self::Function { function, .. } => &function.name,
            Self::Mcp { name, .. } => name,
        }
    }

    /// The raw JSON argument string.
    pub fn arguments(&self) -> &str {
        match self {
            Self::Function { function, .. } => &function.arguments,
            Self::Mcp { arguments, .. } => arguments,
        }
    }
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    pub name: String,

    /// Arguments as a JSON-encoded string.
    #[serde(default)]
    pub arguments: String,
}

/// Error information for a failed run.
#[derive(Debug, Clone, Deserialize)]
pub struct LastError {
    pub code: String,
    pub message: String,
}

/// Token usage for a run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ---------------------------------------------------------------------------
// API functions
// ---------------------------------------------------------------------------

/// Create and start a run on a thread.
///
/// # Tracing
///
/// Emits a span named `foundry::runs::create` with fields `thread_id` and `assistant_id`.
#[tracing::instrument(
    name = "foundry::runs::create",
    skip(client, request),
    fields(thread_id = %thread_id, assistant_id = %request.assistant_id)
)]
pub async fn create(
    client: &ServiceClient,
    thread_id: &str,
    request: &RunCreateRequest,
) -> ServiceResult<Run> {
    tracing::debug!("creating run");

    let path = format!("/threads/{}/runs?{}", thread_id, API_VERSION);
    let response = client.post(&path, request).await?;
    let run = response.json::<Run>().await?;

    tracing::debug!(run_id = %run.id, status = %run.status, "run created");
    Ok(run)
}

/// Fetch the current state of a run.
#[tracing::instrument(
    name = "foundry::runs::get",
    skip(client),
    fields(thread_id = %thread_id, run_id = %run_id)
)]
pub async fn get(client: &ServiceClient, thread_id: &str, run_id: &str) -> ServiceResult<Run> {
    let path = format!("/threads/{}/runs/{}?{}", thread_id, run_id, API_VERSION);
    let response = client.get(&path).await?;
    let run = response.json::<Run>().await?;

    tracing::trace!(status = %run.status, "run retrieved");
    Ok(run)
}

/// Ask the service to cancel a run.
///
/// The returned run is usually `cancelling`; it becomes `cancelled` later.
#[tracing::instrument(
    name = "foundry::runs::cancel",
    skip(client),
    fields(thread_id = %thread_id, run_id = %run_id)
)]
pub async fn cancel(client: &ServiceClient, thread_id: &str, run_id: &str) -> ServiceResult<Run> {
    tracing::debug!("cancelling run");

    let path = format!(
        "/threads/{}/runs/{}/cancel?{}",
        thread_id, run_id, API_VERSION
    );
    let response = client.post(&path, &serde_json::json!({})).await?;
    Ok(response.json::<Run>().await?)
}

/// Create a thread and a run in one request.
#[tracing::instrument(
    name = "foundry::runs::create_thread_and_run",
    skip(client, request),
    fields(assistant_id = %request.assistant_id)
)]
pub async fn create_thread_and_run(
    client: &ServiceClient,
    request: &CreateThreadAndRunRequest,
) -> ServiceResult<Run> {
    let path = format!("/threads/runs?{}", API_VERSION);
    let response = client.post(&path, request).await?;
    let run = response.json::<Run>().await?;

    tracing::debug!(
        thread_id = %run.thread_id,
        run_id = %run.id,
        status = %run.status,
        "thread and run created"
    );
    Ok(run)
}

/// Submit the outputs for every pending function call in one request.
///
/// # Tracing
///
/// Emits a span named `foundry::runs::submit_tool_outputs` with fields
/// `thread_id`, `run_id`, and `count`.
#[tracing::instrument(
    name = "foundry::runs::submit_tool_outputs",
    skip(client, outputs),
    fields(thread_id = %thread_id, run_id = %run_id, count = outputs.len())
)]
pub async fn submit_tool_outputs(
    client: &ServiceClient,
    thread_id: &str,
    run_id: &str,
    outputs: &[ToolOutput],
) -> ServiceResult<Run> {
    let body = SubmitToolOutputsRequest {
        tool_outputs: Some(outputs),
        tool_approvals: None,
    };
    submit(client, thread_id, run_id, &body).await
}

/// Submit approval decisions for every pending MCP call in one request.
#[tracing::instrument(
    name = "foundry::runs::submit_tool_approvals",
    skip(client, approvals),
    fields(thread_id = %thread_id, run_id = %run_id, count = approvals.len())
)]
pub async fn submit_tool_approvals(
    client: &ServiceClient,
    thread_id: &str,
    run_id: &str,
    approvals: &[ToolApproval],
) -> ServiceResult<Run> {
    let body = SubmitToolOutputsRequest {
        tool_outputs: None,
        tool_approvals: Some(approvals),
    };
    submit(client, thread_id, run_id, &body).await
}

async fn submit(
    client: &ServiceClient,
    thread_id: &str,
    run_id: &str,
    body: &SubmitToolOutputsRequest<'_>,
) -> ServiceResult<Run> {
    let path = format!(
        "/threads/{}/runs/{}/submit_tool_outputs?{}",
        thread_id, run_id, API_VERSION
    );
    let response = client.post(&path, body).await?;
    let run = response.json::<Run>().await?;

    tracing::debug!(status = %run.status, "tool results submitted");
    Ok(run)
}
