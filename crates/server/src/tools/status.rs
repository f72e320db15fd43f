//! agent_status tool implementation.

use offgrid_agent::AgentHandle;
use rmcp::{ErrorData as McpError, model::CallToolResult};

use super::json_result;

/// Implementation of the agent_status tool.
pub async fn status_impl(agent: &AgentHandle) -> Result<CallToolResult, McpError> {
    let status = agent.status().await?;
    json_result(&status)
}
