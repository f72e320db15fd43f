//! offgrid command-line entry point.
//!
//! Output is JSON on stdout; logs go to stderr.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use offgrid_agent::{Agent, HttpNetwork, LifecycleManager, NetworkConfig};
use offgrid_core::{AgentDb, AppConfig, ArtifactStore};

mod cli;

use cli::{Cli, Command, fetch_request, mutation_draft};

#[derive(Serialize)]
struct FetchOutput {
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    body: String,
    classification: offgrid_agent::Classification,
    source: offgrid_agent::ResponseSource,
}

#[derive(Serialize)]
struct StatusOutput {
    current_generation: String,
    active_generation: Option<String>,
    generations: Vec<String>,
    pending_mutations: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    run(cli.command, &config).await
}

async fn run(command: Command, config: &AppConfig) -> Result<()> {
    let db = AgentDb::open(&config.db_path).await?;
    let network = Arc::new(HttpNetwork::new(NetworkConfig::from_app_config(config)?)?);
    let agent = Agent::new(config, network.clone(), Arc::new(db.clone()), Arc::new(db.clone())).await?;

    match command {
        Command::Install => print(&agent.install().await?),
        Command::Activate => {
            let origin = url::Url::parse(&config.origin)?;
            let lifecycle = LifecycleManager::new(network, Arc::new(db), origin, config.generation.clone());
            print(&lifecycle.activate().await?)
        }
        Command::Fetch { url, method, headers, body, document } => {
            let request = fetch_request(&url, &method, &headers, body.as_deref(), document);
            let routed = agent.fetch(request).await;
            agent.settle().await;
            print(&FetchOutput {
                status: routed.response.status,
                status_text: routed.response.status_text.clone(),
                body: routed.response.text(),
                headers: routed.response.headers,
                classification: routed.classification,
                source: routed.source,
            })
        }
        Command::Enqueue { url, method, headers, body } => {
            let draft = mutation_draft(&url, &method, &headers, body.as_deref());
            print(&agent.queue().enqueue(draft).await?)
        }
        Command::Sync { tag } => {
            let tag = tag.unwrap_or_else(|| config.sync_tag.clone());
            print(&agent.sync(&tag).await?)
        }
        Command::Queue => print(&agent.queue().pending().await?),
        Command::Status => print(&StatusOutput {
            current_generation: config.generation.clone(),
            active_generation: db.active_generation().await?,
            generations: db.generations().await?,
            pending_mutations: agent.queue().pending_count().await?,
        }),
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
