//! MCP tool implementations.
//!
//! This module contains all tools exposed by the offgrid server.

pub mod cache;
pub mod fetch;
pub mod message;
pub mod queue;
pub mod status;
pub mod sync;

pub use cache::{CacheGetParams, cache_get_impl};
pub use fetch::{AgentFetchParams, fetch_impl};
pub use message::{AgentMessageParams, message_impl};
pub use queue::queue_list_impl;
pub use status::status_impl;
pub use sync::{AgentSyncParams, sync_impl};

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use offgrid_core::Error;

/// Serialize a tool output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
