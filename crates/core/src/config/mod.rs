//! Agent settings.
//!
//! Sources, lowest to highest precedence: built-in defaults, the TOML file
//! named by `OFFGRID_CONFIG_FILE`, then `OFFGRID_*` environment variables.
//! Nested keys use a double underscore separator.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Everything the agent, server and CLI need to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding artifacts and queued mutations.
    ///
    /// Set via OFFGRID_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin the agent serves. Root-relative URLs resolve against it and only
    /// responses from it are cached.
    ///
    /// Set via OFFGRID_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Current cache generation tag.
    ///
    /// Set via OFFGRID_GENERATION environment variable.
    #[serde(default = "default_generation")]
    pub generation: String,

    /// Any URL containing this string bypasses the cache.
    ///
    /// Set via OFFGRID_API_PREFIX environment variable.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Essential URLs pre-warmed at install, in order.
    ///
    /// Set via OFFGRID_MANIFEST environment variable or the `manifest` TOML array.
    #[serde(default = "default_manifest")]
    pub manifest: Vec<String>,

    /// Sync tag that drains the mutation queue.
    ///
    /// Set via OFFGRID_SYNC_TAG environment variable.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,

    /// User-Agent string for outbound requests.
    ///
    /// Set via OFFGRID_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Optional HTTP client timeout in milliseconds. Unset means the network
    /// call decides.
    ///
    /// Set via OFFGRID_TIMEOUT_MS environment variable.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./offgrid.sqlite")
}

fn default_origin() -> String {
    "http://localhost:3000".into()
}

fn default_generation() -> String {
    "offgrid-v1".into()
}

fn default_api_prefix() -> String {
    "/api/".into()
}

fn default_manifest() -> Vec<String> {
    vec!["/".into()]
}

fn default_sync_tag() -> String {
    "background-sync".into()
}

fn default_user_agent() -> String {
    "offgrid/0.1".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            generation: default_generation(),
            api_prefix: default_api_prefix(),
            manifest: default_manifest(),
            sync_tag: default_sync_tag(),
            user_agent: default_user_agent(),
            timeout_ms: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Read defaults, the optional TOML file and the environment, then validate.
    ///
    /// # Errors
    ///
    /// `ConfigError::LoadFailed` when a source cannot be parsed into the
    /// expected shape, `ConfigError::Invalid` when a field fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider stack used by [`AppConfig::load`].
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("OFFGRID_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("OFFGRID_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Extract and validate a configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
