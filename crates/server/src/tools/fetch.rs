//! agent_fetch tool implementation.
//!
//! Routes a request through the agent exactly as an intercepted page request
//! would be routed, and reports where the response came from.

use std::collections::BTreeMap;

use offgrid_agent::{AgentHandle, Classification, ResponseSource};
use offgrid_core::{Destination, Request, ResponseKind};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Input parameters for agent_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentFetchParams {
    /// Absolute URL or path relative to the agent origin.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body.
    #[serde(default)]
    pub body: Option<String>,

    /// "document" for a top-level navigation, "other" otherwise (default).
    #[serde(default)]
    pub destination: Destination,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for agent_fetch tool.
#[derive(Debug, Clone, Serialize)]
pub struct AgentFetchOutput {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    pub kind: ResponseKind,
    pub classification: Classification,
    pub source: ResponseSource,
}

impl AgentFetchParams {
    fn into_request(self) -> Request {
        let mut request = Request::new(self.method, self.url).with_destination(self.destination);
        request.headers = self.headers.into_iter().collect();
        if let Some(body) = self.body {
            request = request.with_body(body);
        }
        request
    }
}

/// Implementation of the agent_fetch tool.
pub async fn fetch_impl(agent: &AgentHandle, params: AgentFetchParams) -> Result<CallToolResult, McpError> {
    let routed = agent.fetch(params.into_request()).await?;

    let output = AgentFetchOutput {
        status: routed.response.status,
        status_text: routed.response.status_text.clone(),
        body: routed.response.text(),
        headers: routed.response.headers,
        kind: routed.response.kind,
        classification: routed.classification,
        source: routed.source,
    };

    json_result(&output)
}
