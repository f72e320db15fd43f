//! Command-line interface parsing for offgrid
//!
//! Every command runs once against the configured database and exits, so
//! lifecycle commands act on persisted generations rather than a long-lived
//! agent.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use offgrid_core::{AppConfig, ConfigError, Destination, MutationDraft, Request};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A `--header` value without a colon separator
    #[error("Invalid header: '{0}'. Expected 'Name: value'")]
    InvalidHeader(String),
}

/// offgrid - offline-first request agent
#[derive(Parser, Debug)]
#[command(name = "offgrid")]
#[command(about = "Cache-first request routing and deferred mutation delivery")]
#[command(version)]
pub struct Cli {
    /// Database path (overrides OFFGRID_DB_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Agent origin (overrides OFFGRID_ORIGIN)
    #[arg(long, global = true, value_name = "URL")]
    pub origin: Option<String>,

    /// Current generation tag (overrides OFFGRID_GENERATION)
    #[arg(long, global = true, value_name = "TAG")]
    pub generation: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pre-warm the manifest into the current generation
    Install,

    /// Delete every generation except the current one and mark it active
    Activate,

    /// Route one request through the agent
    Fetch {
        url: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request header, repeatable ("Name: value")
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        #[arg(short, long)]
        body: Option<String>,
        /// Treat the request as a top-level navigation
        #[arg(long)]
        document: bool,
    },

    /// Save a mutation for delivery on the next sync
    Enqueue {
        url: String,
        #[arg(short = 'X', long, default_value = "POST")]
        method: String,
        /// Request header, repeatable ("Name: value")
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        #[arg(short, long)]
        body: Option<String>,
    },

    /// Replay deferred mutations
    Sync {
        /// Sync tag (default: the configured tag)
        #[arg(long)]
        tag: Option<String>,
    },

    /// List deferred mutations, oldest first
    Queue,

    /// Show generations and pending mutation count
    Status,
}

/// Parses a `Name: value` header argument.
pub fn parse_header(s: &str) -> Result<(String, String), CliError> {
    let (name, value) = s.split_once(':').ok_or_else(|| CliError::InvalidHeader(s.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidHeader(s.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Cli {
    /// Loads layered configuration and applies command-line overrides.
    pub fn config(&self) -> Result<AppConfig, ConfigError> {
        self.apply(AppConfig::load()?)
    }

    fn apply(&self, mut config: AppConfig) -> Result<AppConfig, ConfigError> {
        if let Some(db_path) = &self.db_path {
            config.db_path = db_path.clone();
        }
        if let Some(origin) = &self.origin {
            config.origin = origin.clone();
        }
        if let Some(generation) = &self.generation {
            config.generation = generation.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Builds the request for `fetch`.
pub fn fetch_request(
    url: &str, method: &str, headers: &[(String, String)], body: Option<&str>, document: bool,
) -> Request {
    let mut request = Request::new(method, url);
    request.headers = headers.to_vec();
    if let Some(body) = body {
        request = request.with_body(body.to_string());
    }
    if document {
        request = request.with_destination(Destination::Document);
    }
    request
}

/// Builds the draft for `enqueue`.
pub fn mutation_draft(url: &str, method: &str, headers: &[(String, String)], body: Option<&str>) -> MutationDraft {
    MutationDraft {
        url: url.to_string(),
        method: method.to_ascii_uppercase(),
        headers: headers.iter().cloned().collect::<BTreeMap<_, _>>(),
        body: body.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header("Content-Type: application/json").unwrap(), ("Content-Type".into(), "application/json".into()));
        assert_eq!(parse_header("X-Empty:").unwrap(), ("X-Empty".into(), String::new()));
    }

    #[test]
    fn test_parse_header_invalid() {
        assert!(matches!(parse_header("no separator"), Err(CliError::InvalidHeader(_))));
        assert!(matches!(parse_header(": value"), Err(CliError::InvalidHeader(_))));
    }

    #[test]
    fn test_cli_fetch_args() {
        let cli = Cli::parse_from([
            "offgrid", "fetch", "/api/save", "-X", "POST", "-H", "Accept: text/html", "--body", "{}", "--document",
        ]);
        match cli.command {
            Command::Fetch { url, method, headers, body, document } => {
                assert_eq!(url, "/api/save");
                assert_eq!(method, "POST");
                assert_eq!(headers, vec![("Accept".to_string(), "text/html".to_string())]);
                assert_eq!(body.as_deref(), Some("{}"));
                assert!(document);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_overrides() {
        let cli = Cli::parse_from(["offgrid", "status", "--origin", "https://app.example.com", "--generation", "v9"]);
        let config = cli.apply(AppConfig::default()).unwrap();
        assert_eq!(config.origin, "https://app.example.com");
        assert_eq!(config.generation, "v9");
    }

    #[test]
    fn test_cli_override_validated() {
        let cli = Cli::parse_from(["offgrid", "queue", "--origin", "ftp://example.com"]);
        assert!(cli.apply(AppConfig::default()).is_err());
    }

    #[test]
    fn test_enqueue_defaults_to_post() {
        let cli = Cli::parse_from(["offgrid", "enqueue", "/api/x"]);
        let Command::Enqueue { url, method, headers, body } = cli.command else { panic!("expected enqueue") };
        let draft = mutation_draft(&url, &method, &headers, body.as_deref());
        assert_eq!(draft.method, "POST");
        assert!(draft.headers.is_empty());
        assert!(draft.body.is_none());
    }

    #[test]
    fn test_fetch_request_document() {
        let request = fetch_request("/", "get", &[], None, true);
        assert_eq!(request.method, "GET");
        assert_eq!(request.destination, Destination::Document);
        assert!(request.body.is_none());
    }
}
