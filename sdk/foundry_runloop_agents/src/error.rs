use std::time::Duration;

use foundry_runloop_core::error::ServiceError;
use thiserror::Error;

use crate::run::RunStatus;

/// Errors raised by a local tool handler.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The argument string was not valid JSON or did not match the handler's shape.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler ran and failed.
    #[error("tool execution failed: {0}")]
    Execution(String),
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

/// Errors raised while driving a run to completion.
#[derive(Error, Debug)]
pub enum RunLoopError {
    /// A REST call failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The run reached a terminal status other than `completed`.
    #[error("run ended with status {status}: {code}: {message}")]
    RunFailed {
        status: RunStatus,
        code: String,
        message: String,
    },

    /// The deadline passed before the run reached a terminal status.
    #[error("run did not finish within {elapsed:?} (last status: {last_status})")]
    Timeout {
        elapsed: Duration,
        last_status: RunStatus,
    },

    /// The service requested a function that is not registered.
    #[error("run requested unknown tool '{name}'")]
    UnknownTool { name: String },

    /// A registered handler returned an error.
    #[error("tool '{name}' failed: {source}")]
    Tool {
        name: String,
        #[source]
        source: ToolError,
    },

    /// A poll observed a status the previous one cannot lead to.
    #[error("invalid run status transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    /// The run is `requires_action` but carries no pending tool calls.
    #[error("run requires action but lists no tool calls")]
    MissingToolCalls,
}

/// Result type alias for run-loop operations.
pub type RunLoopResult<T> = std::result::Result<T, RunLoopError>;
