//! offgrid-mcp server entry point.
//!
//! Boots the agent against the configured origin, installs and activates the
//! current generation, then exposes the agent over MCP on stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use offgrid_agent::{Agent, HttpNetwork, NetworkConfig};
use offgrid_core::{AgentDb, AppConfig};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(origin = %config.origin, generation = %config.generation, db = %config.db_path.display(), "Starting offgrid server on stdio transport");

    let db = AgentDb::open(&config.db_path).await?;
    let network = HttpNetwork::new(NetworkConfig::from_app_config(&config)?)?;
    let agent = Agent::new(&config, Arc::new(network), Arc::new(db.clone()), Arc::new(db.clone())).await?;
    let (handle, events) = agent.spawn(64);

    match handle.install().await {
        Ok(report) => {
            tracing::info!(generation = %report.generation, stored = report.stored.len(), "generation installed");
            if let Err(err) = handle.activate().await {
                tracing::error!(error = %err, "activation failed; continuing with previous generation");
            }
        }
        Err(err) => tracing::warn!(error = %err, "install failed; continuing with previous generation"),
    }

    let handler = handler::OffgridServer::new(handle, db, &config)?;
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    // The handler owned the last agent handle; the loop settles pending cache writes, then exits.
    if let Err(err) = events.await {
        tracing::error!(error = %err, "agent event loop failed");
    }
    tracing::info!("offgrid server stopped");

    Ok(())
}
