//! cache_get tool implementation.
//!
//! Reads a stored artifact without touching the network.

use offgrid_agent::net::resolve;
use offgrid_core::store::hash::compute_artifact_key;
use offgrid_core::{AgentDb, ArtifactStore, Error, ResponseKind};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use super::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Absolute URL or path relative to the agent origin.
    pub url: String,

    /// Generation to read (default: the active generation).
    #[serde(default)]
    pub generation: Option<String>,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize)]
pub struct CacheGetOutput {
    pub generation: String,
    pub key: String,
    pub url: String,
    pub stored_at: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub kind: ResponseKind,
}

/// Implementation of the cache_get tool.
pub async fn cache_get_impl(db: &AgentDb, origin: &Url, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let url = resolve(origin, &params.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;

    let generation = match params.generation {
        Some(generation) => generation,
        None => db.active_generation().await?.ok_or_else(|| Error::CacheMiss("no active generation".into()))?,
    };

    let key = compute_artifact_key("GET", url.as_str());
    let artifact = db
        .get_artifact(&generation, &key)
        .await?
        .ok_or_else(|| Error::CacheMiss(format!("{url} in generation {generation}")))?;

    let output = CacheGetOutput {
        generation,
        key: artifact.key,
        url: artifact.url,
        stored_at: artifact.stored_at,
        status: artifact.response.status,
        body: artifact.response.text(),
        headers: artifact.response.headers,
        kind: artifact.response.kind,
    };

    json_result(&output)
}
