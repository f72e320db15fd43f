//! Cache generation lifecycle: pre-warm on install, purge on activate.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use url::Url;

use offgrid_core::{Artifact, ArtifactStore, Error, Request};

use crate::net::{Network, resolve};

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub generation: String,
    /// Canonical URLs stored, in manifest order.
    pub stored: Vec<String>,
}

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub generation: String,
    /// Generations deleted, oldest first.
    pub purged: Vec<String>,
    pub artifacts_removed: u64,
}

/// Owns the current generation tag and the only code path that deletes generations.
#[derive(Clone)]
pub struct LifecycleManager {
    network: Arc<dyn Network>,
    artifacts: Arc<dyn ArtifactStore>,
    origin: Url,
    generation: String,
}

impl LifecycleManager {
    pub fn new(
        network: Arc<dyn Network>, artifacts: Arc<dyn ArtifactStore>, origin: Url, generation: impl Into<String>,
    ) -> Self {
        Self { network, artifacts, origin, generation: generation.into() }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Fetch every manifest entry and store all of them under the current generation.
    ///
    /// All fetches must return a 2xx response before anything is written; the
    /// write itself is one transaction.
    ///
    /// # Errors
    ///
    /// Returns `Error::ManifestInstallFailed` for the first entry (in manifest
    /// order) that cannot be resolved or fetched, or a storage fault if the
    /// batch write fails.
    pub async fn install(&self, manifest: &[String]) -> Result<InstallReport, Error> {
        let urls = manifest
            .iter()
            .map(|entry| {
                resolve(&self.origin, entry)
                    .map_err(|e| Error::ManifestInstallFailed { url: entry.clone(), reason: e.to_string() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetches = urls.iter().map(|url| async move {
            let request = Request::get(url.as_str());
            self.network.send(&request).await
        });
        let results = join_all(fetches).await;

        let mut artifacts = Vec::with_capacity(urls.len());
        for (url, result) in urls.iter().zip(results) {
            let response =
                result.map_err(|e| Error::ManifestInstallFailed { url: url.to_string(), reason: e.to_string() })?;
            if !response.ok() {
                return Err(Error::ManifestInstallFailed {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            artifacts.push(Artifact::capture("GET", url.as_str(), response));
        }

        self.artifacts.install_artifacts(&self.generation, &artifacts).await?;

        tracing::info!(generation = %self.generation, artifacts = artifacts.len(), "generation installed");

        Ok(InstallReport {
            generation: self.generation.clone(),
            stored: artifacts.into_iter().map(|artifact| artifact.url).collect(),
        })
    }

    /// Delete every generation other than the current one, then mark the current one active.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` without deleting anything if the current
    /// generation has not been installed.
    pub async fn activate(&self) -> Result<ActivationReport, Error> {
        if !self.artifacts.is_installed(&self.generation).await? {
            return Err(Error::InvalidState(format!("generation {} has not been installed", self.generation)));
        }

        let mut purged = Vec::new();
        let mut artifacts_removed = 0;

        for tag in self.artifacts.generations().await? {
            if tag == self.generation {
                continue;
            }
            let removed = self.artifacts.delete_generation(&tag).await?;
            tracing::info!(generation = %tag, artifacts = removed, "deleted stale generation");
            artifacts_removed += removed;
            purged.push(tag);
        }

        self.artifacts.mark_activated(&self.generation).await?;

        Ok(ActivationReport { generation: self.generation.clone(), purged, artifacts_removed })
    }
}
