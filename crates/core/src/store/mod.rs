//! SQLite-backed storage for cached artifacts and deferred mutations.
//!
//! This module provides the two stores the agent shares between tasks,
//! each behind a trait so callers can substitute their own backend:
//!
//! - [`ArtifactStore`]: response snapshots partitioned by cache generation
//! - [`MutationQueue`]: durable FIFO of writes awaiting delivery
//!
//! [`AgentDb`] implements both on one tokio-rusqlite connection, with WAL
//! mode and versioned migrations. Every record write is a single statement
//! or transaction, so no entry is ever observably half-written.

pub mod artifacts;
pub mod connection;
pub mod hash;
pub mod migrations;
pub mod mutations;
pub mod traits;

pub use crate::Error;

pub use connection::AgentDb;
pub use traits::{ArtifactStore, MutationQueue};
