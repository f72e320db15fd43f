//! agent_sync tool implementation.
//!
//! Signals the agent to replay its deferred mutations.

use offgrid_agent::{AgentHandle, DrainReport};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Input parameters for agent_sync tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AgentSyncParams {
    /// Sync tag (default: the configured sync tag). Other tags are ignored.
    #[serde(default)]
    pub tag: Option<String>,
}

/// Output structure for agent_sync tool.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSyncOutput {
    pub tag: String,
    /// False when the tag did not match and nothing was replayed.
    pub triggered: bool,
    pub report: Option<DrainReport>,
}

/// Implementation of the agent_sync tool.
pub async fn sync_impl(
    agent: &AgentHandle, default_tag: &str, params: AgentSyncParams,
) -> Result<CallToolResult, McpError> {
    let tag = params.tag.unwrap_or_else(|| default_tag.to_string());
    let report = agent.sync(tag.clone()).await?;

    json_result(&AgentSyncOutput { tag, triggered: report.is_some(), report })
}
