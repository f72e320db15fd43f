//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the running agent.
use crate::tools::{
    AgentFetchParams, AgentMessageParams, AgentSyncParams, CacheGetParams, cache_get_impl, fetch_impl, message_impl,
    queue_list_impl, status_impl, sync_impl,
};

use offgrid_agent::AgentHandle;
use offgrid_core::{AgentDb, AppConfig, Error};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use url::Url;

/// The main MCP server handler for offgrid.
#[derive(Clone)]
pub struct OffgridServer {
    agent: AgentHandle,
    db: AgentDb,
    origin: Url,
    sync_tag: String,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl OffgridServer {
    /// Create a new server handler around a running agent.
    pub fn new(agent: AgentHandle, db: AgentDb, config: &AppConfig) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self { agent, db, origin, sync_tag: config.sync_tag.clone(), tool_router: Self::tool_router() })
    }

    #[tool(
        description = "Route a request through the offline agent. GET requests outside the API prefix are served cache-first; everything else goes to the network, with a synthetic 503 when it is unreachable."
    )]
    async fn agent_fetch(&self, params: Parameters<AgentFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.agent, params.0).await
    }

    #[tool(description = "Send an application message to the agent. SAVE_MUTATION stores a write for delivery on the next sync.")]
    async fn agent_message(&self, params: Parameters<AgentMessageParams>) -> Result<CallToolResult, McpError> {
        message_impl(&self.agent, params.0).await
    }

    #[tool(description = "Trigger a background sync. Replays deferred mutations in order and keeps any that fail.")]
    async fn agent_sync(&self, params: Parameters<AgentSyncParams>) -> Result<CallToolResult, McpError> {
        sync_impl(&self.agent, &self.sync_tag, params.0).await
    }

    #[tool(description = "Read a cached artifact by URL from the active generation or a named one. Never touches the network.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        cache_get_impl(&self.db, &self.origin, params.0).await
    }

    #[tool(description = "List deferred mutations waiting for the next sync, oldest first.")]
    async fn queue_list(&self) -> Result<CallToolResult, McpError> {
        queue_list_impl(&self.db).await
    }

    #[tool(description = "Report lifecycle state, current and serving generations, and the pending mutation count.")]
    async fn agent_status(&self) -> Result<CallToolResult, McpError> {
        status_impl(&self.agent).await
    }
}

impl ServerHandler for OffgridServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "offgrid".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router.call(ToolCallContext::new(self, request, context)).await
    }
}
