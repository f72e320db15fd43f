//! agent_message tool implementation.
//!
//! Delivers an out-of-band message from the application to the agent.

use offgrid_agent::AgentHandle;
use offgrid_core::AgentMessage;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Input parameters for agent_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentMessageParams {
    /// The message, e.g. `{"type": "SAVE_MUTATION", "mutation": {"url": "/api/x", "body": "..."}}`.
    pub message: AgentMessage,
}

/// Implementation of the agent_message tool. Returns the queued mutation.
pub async fn message_impl(agent: &AgentHandle, params: AgentMessageParams) -> Result<CallToolResult, McpError> {
    let queued = agent.message(params.message).await?;
    json_result(&queued)
}
