//! Approve or deny MCP tool calls the service asks about.

use std::collections::HashSet;

use crate::run::{RequiredToolCall, ToolApproval};

/// Which MCP tool calls to approve.
///
/// Function calls are never subject to approval; they are resolved by the
/// [`ToolRegistry`](crate::tools::ToolRegistry) instead, and this policy
/// denies them if asked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Approve every call.
    #[default]
    ApproveAll,
    /// Deny every call.
    DenyAll,
    /// Approve calls to these server labels only.
    AllowServers(HashSet<String>),
    /// Approve calls to these tool names only, on any server.
    AllowTools(HashSet<String>),
}

impl ApprovalPolicy {
    pub fn allow_servers<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllowServers(labels.into_iter().map(Into::into).collect())
    }

    pub fn allow_tools<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllowTools(names.into_iter().map(Into::into).collect())
    }

    pub fn approves(&self, call: &RequiredToolCall) -> bool {
        let RequiredToolCall::Mcp {
            name, server_label, ..
        } = call
        else {
            return false;
        };

        match self {
            Self::ApproveAll => true,
            Self::DenyAll => false,
            Self::AllowServers(labels) => labels.contains(server_label),
            Self::AllowTools(names) => names.contains(name),
        }
    }

    /// One decision per call, in the order given.
    pub fn decide(&self, calls: &[RequiredToolCall]) -> Vec<ToolApproval> {
        calls
            .iter()
            .map(|call| {
                let approve = self.approves(call);
                tracing::debug!(
                    tool = call.name(),
                    call_id = call.id(),
                    approve,
                    "mcp approval decided"
                );
                ToolApproval {
                    tool_call_id: call.id().to_string(),
                    approve,
                }
            })
            .collect()
    }
}
