//! queue_list tool implementation.

use offgrid_core::{AgentDb, MutationQueue, QueuedMutation};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use serde::Serialize;

use super::json_result;

/// Output structure for queue_list tool.
#[derive(Debug, Clone, Serialize)]
pub struct QueueListOutput {
    pub count: usize,
    /// Pending mutations, oldest first.
    pub mutations: Vec<QueuedMutation>,
}

/// Implementation of the queue_list tool.
pub async fn queue_list_impl(db: &AgentDb) -> Result<CallToolResult, McpError> {
    let mutations = db.pending().await?;
    json_result(&QueueListOutput { count: mutations.len(), mutations })
}
