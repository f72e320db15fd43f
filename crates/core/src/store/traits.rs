//! Store interfaces shared by every task the agent runs.

use async_trait::async_trait;

use crate::Error;
use crate::model::{Artifact, MutationDraft, QueuedMutation};

/// Response snapshots partitioned by cache generation.
///
/// A generation is deleted as a whole or not at all. Only a generation whose
/// manifest was installed can be activated.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Look up an artifact by key within one generation.
    async fn get_artifact(&self, generation: &str, key: &str) -> Result<Option<Artifact>, Error>;

    /// Register an empty, uninstalled generation. No-op if it already exists.
    async fn create_generation(&self, tag: &str) -> Result<(), Error>;

    /// Insert or replace one artifact in an existing generation. Last writer wins.
    ///
    /// Fails with `Error::InvalidState` if the generation does not exist, so a
    /// write racing a purge never resurrects the purged generation.
    async fn put_artifact(&self, generation: &str, artifact: &Artifact) -> Result<(), Error>;

    /// Store a manifest batch and mark the generation installed, in one transaction.
    async fn install_artifacts(&self, generation: &str, artifacts: &[Artifact]) -> Result<(), Error>;

    /// Whether `install_artifacts` has completed for `tag`.
    async fn is_installed(&self, tag: &str) -> Result<bool, Error>;

    /// All artifacts of a generation, ordered by URL.
    async fn list_artifacts(&self, generation: &str) -> Result<Vec<Artifact>, Error>;

    /// Every generation tag known to the store, oldest first.
    async fn generations(&self) -> Result<Vec<String>, Error>;

    /// Remove a generation and all of its artifacts. Returns the number of artifacts removed.
    async fn delete_generation(&self, tag: &str) -> Result<u64, Error>;

    /// Record `tag` as the generation that serves cached responses.
    ///
    /// Fails with `Error::InvalidState` unless `tag` is installed.
    async fn mark_activated(&self, tag: &str) -> Result<(), Error>;

    /// The most recently activated generation, if any.
    async fn active_generation(&self) -> Result<Option<String>, Error>;
}

/// Durable FIFO of mutations awaiting delivery.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    /// Append a mutation. Returns once the record is durable. Never deduplicates.
    async fn enqueue(&self, draft: MutationDraft) -> Result<QueuedMutation, Error>;

    /// Pending mutations in enqueue order.
    async fn pending(&self) -> Result<Vec<QueuedMutation>, Error>;

    /// Remove one mutation. Returns false if it was already gone.
    async fn remove(&self, id: &str) -> Result<bool, Error>;

    async fn pending_count(&self) -> Result<u64, Error>;
}
