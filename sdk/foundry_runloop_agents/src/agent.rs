//! Agent management.
//!
//! An agent is a model deployment plus instructions and the tool
//! definitions the service may call back into during a run.
//!
//! ## Example
//!
//! ```rust,no_run
//! use foundry_runloop_core::client::ServiceClient;
//! use foundry_runloop_agents::agent::{self, AgentCreateRequest, ToolDefinition};
//!
//! # async fn example(client: &ServiceClient) -> Result<(), Box<dyn std::error::Error>> {
//! let request = AgentCreateRequest::builder()
//!     .model("gpt-4o")
//!     .name("My Assistant")
//!     .instructions("You are a helpful assistant.")
//!     .tools(vec![ToolDefinition::code_interpreter()])
//!     .build()?;
//!
//! let agent = agent::create(client, &request).await?;
//! agent::delete(client, &agent.id).await?;
//! # Ok(())
//! # }
//! ```

use foundry_runloop_core::client::ServiceClient;
use foundry_runloop_core::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};

use crate::models::{DeletionStatus, ListPage, API_VERSION};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A request to create a new agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCreateRequest {
    /// The model deployment to use (e.g., "gpt-4o").
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Sampling temperature (0.0 to 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling (0.0 to 1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// Builder for [`AgentCreateRequest`].
#[derive(Debug, Default)]
pub struct AgentCreateRequestBuilder {
    model: Option<String>,
    name: Option<String>,
    instructions: Option<String>,
    description: Option<String>,
    tools: Option<Vec<ToolDefinition>>,
    metadata: Option<serde_json::Value>,
    temperature: Option<f32>,
    top_p: Option<f32>,
}

impl AgentCreateRequest {
    /// Create a new builder.
    pub fn builder() -> AgentCreateRequestBuilder {
        AgentCreateRequestBuilder::default()
    }
}

impl AgentCreateRequestBuilder {
    /// Set the model deployment name. **Required.**
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the tools available to this agent.
    ///
    /// Use [`ToolRegistry::definitions`](crate::tools::ToolRegistry::definitions)
    /// to advertise every locally registered function.
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
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

    /// Build the request, rejecting a missing model or out-of-range sampling values.
    pub fn build(self) -> ServiceResult<AgentCreateRequest> {
        let model = self
            .model
            .ok_or_else(|| ServiceError::Builder("model is required".into()))?;

        if model.trim().is_empty() {
            return Err(ServiceError::Builder("model cannot be empty".into()));
        }

        validate_sampling(self.temperature, self.top_p)?;

        Ok(AgentCreateRequest {
            model,
            name: self.name,
            instructions: self.instructions,
            description: self.description,
            tools: self.tools,
            metadata: self.metadata,
            temperature: self.temperature,
            top_p: self.top_p,
        })
    }
}

/// Shared range checks for agent and run sampling overrides.
pub(crate) fn validate_sampling(temperature: Option<f32>, top_p: Option<f32>) -> ServiceResult<()> {
    if let Some(temp) = temperature {
        if !(0.0..=2.0).contains(&temp) {
            return Err(ServiceError::Builder(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
    }
    if let Some(top_p) = top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(ServiceError::Builder(
                "top_p must be between 0.0 and 1.0".into(),
            ));
        }
    }
    Ok(())
}

/// A tool an agent may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    /// Service-hosted code interpreter.
    CodeInterpreter,

    /// Service-hosted file search.
    FileSearch,

    /// A function resolved locally through a [`ToolRegistry`](crate::tools::ToolRegistry).
    Function { function: FunctionDefinition },

    /// A remote MCP server; calls may require approval.
    Mcp(McpToolDefinition),

    /// A tool type this crate does not model (e.g. grounding tools configured in the portal).
    #[serde(other)]
    Other,
}

impl ToolDefinition {
    pub fn code_interpreter() -> Self {
        Self::CodeInterpreter
    }

    pub fn file_search() -> Self {
        Self::FileSearch
    }

    pub fn function(definition: FunctionDefinition) -> Self {
        Self::Function {
            function: definition,
        }
    }

    pub fn mcp(definition: McpToolDefinition) -> Self {
        Self::Mcp(definition)
    }
}

/// Definition of a function tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the function parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Connection details for an MCP server tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    /// Label the service reports back on each approval request.
    pub server_label: String,

    /// Streamable-HTTP endpoint of the server.
    pub server_url: String,

    /// Restrict the agent to these tools. Empty means all tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,

    /// Whether calls wait for a `submit_tool_approval` round. The service
    /// default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<McpApprovalMode>,
}

/// When the service asks the caller to approve MCP tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpApprovalMode {
    /// Calls run without an approval round.
    Never,
    /// Every call is surfaced as `requires_action`.
    Always,
}

impl McpToolDefinition {
    pub fn new(server_label: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            server_label: server_label.into(),
            server_url: server_url.into(),
            allowed_tools: Vec::new(),
            require_approval: None,
        }
    }

    pub fn require_approval(mut self, mode: McpApprovalMode) -> Self {
        self.require_approval = Some(mode);
        self
    }

    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// An agent as stored by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    pub id: String,

    /// Object type, always "assistant".
    pub object: String,

    pub created_at: u64,
    pub model: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,

    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    pub metadata: Option<serde_json::Value>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// Response from listing agents.
pub type AgentList = ListPage<Agent>;

// ---------------------------------------------------------------------------
// API functions
// ---------------------------------------------------------------------------

/// Create a new agent.
///
/// # Tracing
///
/// Emits a span named `foundry::agents::create` with field `model`.
#[tracing::instrument(
    name = "foundry::agents::create",
    skip(client, request),
    fields(model = %request.model)
)]
pub async fn create(client: &ServiceClient, request: &AgentCreateRequest) -> ServiceResult<Agent> {
    tracing::debug!("creating agent");

    let path = format!("/assistants?{}", API_VERSION);
    let response = client.post(&path, request).await?;
    let agent = response.json::<Agent>().await?;

    tracing::debug!(agent_id = %agent.id, "agent created");
    Ok(agent)
}

/// Get an agent by ID.
///
/// # Tracing
///
/// Emits a span named `foundry::agents::get` with field `agent_id`.
#[tracing::instrument(
    name = "foundry::agents::get",
    skip(client),
    fields(agent_id = %agent_id)
)]
pub async fn get(client: &ServiceClient, agent_id: &str) -> ServiceResult<Agent> {
    let path = format!("/assistants/{}?{}", agent_id, API_VERSION);
    let response = client.get(&path).await?;
    Ok(response.json::<Agent>().await?)
}

/// List agents in the project.
#[tracing::instrument(name = "foundry::agents::list", skip(client))]
pub async fn list(client: &ServiceClient) -> ServiceResult<AgentList> {
    let path = format!("/assistants?{}", API_VERSION);
    let response = client.get(&path).await?;
    let list = response.json::<AgentList>().await?;

    tracing::debug!(count = list.data.len(), "agents listed");
    Ok(list)
}

/// Delete an agent.
///
/// # Tracing
///
/// Emits a span named `foundry::agents::delete` with field `agent_id`.
#[tracing::instrument(
    name = "foundry::agents::delete",
    skip(client),
    fields(agent_id = %agent_id)
)]
pub async fn delete(client: &ServiceClient, agent_id: &str) -> ServiceResult<DeletionStatus> {
    tracing::debug!("deleting agent");

    let path = format!("/assistants/{}?{}", agent_id, API_VERSION);
    let response = client.delete(&path).await?;
    let result = response.json::<DeletionStatus>().await?;

    tracing::debug!(deleted = result.deleted, "agent deletion complete");
    Ok(result)
}
