//! Local function tools and the registry that resolves pending calls.
//!
//! The registry is closed: a run may only call functions registered here,
//! and the agent is created with exactly [`ToolRegistry::definitions`].
//!
//! ```rust
//! use foundry_runloop_agents::agent::FunctionDefinition;
//! use foundry_runloop_agents::tools::{FunctionTool, ToolRegistry};
//!
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(FunctionTool::new(
//!         FunctionDefinition {
//!             name: "getUserFavoriteCity".into(),
//!             description: Some("Gets the user's favorite city.".into()),
//!             parameters: None,
//!         },
//!         |_args| Ok("Seattle, WA".to_string()),
//!     ))
//!     .expect("first registration");
//!
//! assert_eq!(registry.len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{FunctionDefinition, ToolDefinition};
use crate::error::{RunLoopError, RunLoopResult, ToolError};
use crate::run::{RequiredToolCall, ToolOutput};

/// A function the model may call, executed locally.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name the model uses to call this tool.
    fn name(&self) -> &str;

    /// Definition sent to the service when the agent is created.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool with parsed JSON arguments and return its output text.
    async fn call(&self, arguments: Value) -> Result<String, ToolError>;
}

type SyncFn = dyn Fn(Value) -> Result<String, ToolError> + Send + Sync;

/// A [`ToolHandler`] backed by a synchronous closure.
pub struct FunctionTool {
    definition: FunctionDefinition,
    func: Box<SyncFn>,
}

impl FunctionTool {
    pub fn new<F>(definition: FunctionDefinition, func: F) -> Self
    where
        F: Fn(Value) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self {
            definition,
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolHandler for FunctionTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.definition.clone())
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        (self.func)(arguments)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolRegistryError {
    #[error("tool already registered: {0}")]
    Conflict(String),
}

/// Closed set of local tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn register(&mut self, handler: impl ToolHandler + 'static) -> Result<(), ToolRegistryError> {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), ToolRegistryError> {
        let name = handler.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolRegistryError::Conflict(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, handler);
        Ok(())
    }

    /// Tool definitions for agent creation, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|handler| handler.definition())
            .collect()
    }

    /// Execute one pending call and wrap its result for submission.
    ///
    /// An empty argument string is treated as `{}`.
    pub async fn resolve(&self, call: &RequiredToolCall) -> RunLoopResult<ToolOutput> {
        let name = call.name();
        let handler = self
            .tools
            .get(name)
            .ok_or_else(|| RunLoopError::UnknownTool {
                name: name.to_string(),
            })?;

        let raw = call.arguments().trim();
        let arguments = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(raw).map_err(|e| RunLoopError::Tool {
                name: name.to_string(),
                source: e.into(),
            })?
        };

        tracing::debug!(tool = name, call_id = call.id(), "invoking tool");
        let output = handler
            .call(arguments)
            .await
            .map_err(|source| RunLoopError::Tool {
                name: name.to_string(),
                source,
            })?;

        Ok(ToolOutput {
            tool_call_id: call.id().to_string(),
            output,
        })
    }
}
