//! Unified error types for offgrid.
//!
//! Every variant carries a stable code prefix so log lines and MCP errors
//! can be matched without parsing free text.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the offgrid agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// URL could not be resolved against the origin.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// The network call itself failed.
    #[error("NETWORK_UNAVAILABLE: {0}")]
    NetworkUnavailable(String),

    /// Database operation failed.
    #[error("STORAGE_FAULT: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORAGE_FAULT: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored record could not be decoded.
    #[error("STORAGE_FAULT: corrupt record: {0}")]
    CorruptRecord(String),

    /// No artifact stored for the given key.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// A manifest entry could not be pre-warmed.
    #[error("MANIFEST_INSTALL_FAILED: {url}: {reason}")]
    ManifestInstallFailed { url: String, reason: String },

    /// A queued mutation could not be delivered.
    #[error("REPLAY_FAILED: {id}: {reason}")]
    ReplayFailed { id: String, reason: String },

    /// Lifecycle transition not allowed from the current state.
    #[error("INVALID_STATE: {0}")]
    InvalidState(String),
}

impl Error {
    /// True for faults raised by the artifact store or the mutation queue.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Error::Database(_) | Error::MigrationFailed(_) | Error::CorruptRecord(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CorruptRecord(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::NetworkUnavailable(msg) => (-32008, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::CorruptRecord(msg) => (-32002, msg.clone()),
            Error::CacheMiss(msg) => (-32001, msg.clone()),
            Error::ManifestInstallFailed { .. } => (-32020, err.to_string()),
            Error::ReplayFailed { .. } => (-32021, err.to_string()),
            Error::InvalidState(msg) => (-32022, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
