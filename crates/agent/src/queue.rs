//! Deferred mutation delivery.
//!
//! Mutations are appended only on explicit request and replayed only when a
//! sync is triggered. Delivery is at-least-once: an entry whose removal fails
//! after a successful replay is sent again on the next drain.

use std::sync::Arc;

use serde::Serialize;

use offgrid_core::{Error, MutationDraft, MutationQueue, QueuedMutation};

use crate::net::Network;

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Ids in the order replay was attempted.
    pub attempted: Vec<String>,
    pub delivered: Vec<String>,
    pub retained: Vec<String>,
}

/// Queue plus the network used to replay it.
#[derive(Clone)]
pub struct DeferredQueue {
    queue: Arc<dyn MutationQueue>,
    network: Arc<dyn Network>,
}

impl DeferredQueue {
    pub fn new(queue: Arc<dyn MutationQueue>, network: Arc<dyn Network>) -> Self {
        Self { queue, network }
    }

    pub async fn enqueue(&self, draft: MutationDraft) -> Result<QueuedMutation, Error> {
        let mutation = self.queue.enqueue(draft).await?;
        tracing::info!(id = %mutation.id, url = %mutation.url, "mutation saved for later delivery");
        Ok(mutation)
    }

    pub async fn pending(&self) -> Result<Vec<QueuedMutation>, Error> {
        self.queue.pending().await
    }

    pub async fn pending_count(&self) -> Result<u64, Error> {
        self.queue.pending_count().await
    }

    /// Replay every pending mutation in enqueue order.
    ///
    /// A failed replay keeps its entry and the drain moves on.
    ///
    /// # Errors
    ///
    /// Only a failure to read the queue aborts the drain.
    pub async fn drain(&self) -> Result<DrainReport, Error> {
        let pending = self.queue.pending().await?;
        let mut report = DrainReport::default();

        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "replaying deferred mutations");
        }

        for mutation in pending {
            report.attempted.push(mutation.id.clone());

            if let Err(err) = self.replay(&mutation).await {
                tracing::warn!(error = %err, "deferred mutation kept for next sync");
                report.retained.push(mutation.id);
                continue;
            }

            match self.queue.remove(&mutation.id).await {
                Ok(_) => report.delivered.push(mutation.id),
                Err(err) => {
                    tracing::warn!(id = %mutation.id, error = %err, "delivered mutation could not be removed");
                    report.retained.push(mutation.id);
                }
            }
        }

        Ok(report)
    }

    async fn replay(&self, mutation: &QueuedMutation) -> Result<(), Error> {
        let failed = |reason: String| Error::ReplayFailed { id: mutation.id.clone(), reason };

        let response = self.network.send(&mutation.to_request()).await.map_err(|e| failed(e.to_string()))?;
        if !response.ok() {
            return Err(failed(format!("status {}", response.status)));
        }

        tracing::debug!(id = %mutation.id, status = response.status, "deferred mutation delivered");
        Ok(())
    }
}
