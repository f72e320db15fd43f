//! Core types and shared functionality for offgrid.
//!
//! This crate provides:
//! - Request, response, artifact, and queue record types
//! - Artifact store and mutation queue with SQLite backend
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod model;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use model::{
    AgentMessage, Artifact, Destination, Headers, MutationDraft, QueuedMutation, Request, Response, ResponseKind,
};
pub use store::{AgentDb, ArtifactStore, MutationQueue};
