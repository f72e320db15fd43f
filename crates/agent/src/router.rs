//! Request routing: classify every intercepted request and produce a response.
//!
//! ### Strategies
//! - **NetworkOnly**: non-GET requests, URLs containing the API prefix, and
//!   URLs that cannot be resolved. The artifact store is never touched.
//! - **CacheFirst**: everything else. A stored artifact is returned without
//!   revalidation; on a miss the network response is returned and, when it is
//!   a same-origin 200, a copy is written to the store in a tracked task.
//!
//! Reads and writes both target [`GenerationView::cache`], so anything written
//! is servable by the next identical request.
//!
//! Every path resolves to a response. Network failures become a synthetic 503
//! (or the cached start page for document navigations).

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use url::Url;

use offgrid_core::store::hash::compute_artifact_key;
use offgrid_core::{Artifact, ArtifactStore, Destination, Error, Request, Response, ResponseKind};

use crate::net::{Network, resolve};

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    NetworkOnly,
    CacheFirst,
}

/// Where the returned response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// Cached start page served for a failed navigation.
    OfflineFallback,
    /// Constructed by the agent after a network failure.
    Synthetic,
}

/// Inputs to classification.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub origin: Url,
    pub api_prefix: String,
}

impl RoutePolicy {
    /// The canonical URL to cache under, or `None` if the request must bypass the cache.
    pub fn cache_url(&self, request: &Request) -> Option<Url> {
        if !request.is_safe() || self.api_prefix.is_empty() {
            return None;
        }
        let url = resolve(&self.origin, &request.url).ok()?;
        if url.as_str().contains(&self.api_prefix) || request.url.contains(&self.api_prefix) {
            return None;
        }
        Some(url)
    }

    /// Canonical URL of the start page used as the offline navigation fallback.
    pub fn root_url(&self) -> Url {
        let mut root = self.origin.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        root
    }
}

/// Pure classification of a request under `policy`.
pub fn classify(request: &Request, policy: &RoutePolicy) -> Classification {
    match policy.cache_url(request) {
        Some(_) => Classification::CacheFirst,
        None => Classification::NetworkOnly,
    }
}

/// The configured generation and the activated one, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationView {
    /// Configured generation.
    pub current: String,
    /// Last activated generation.
    pub serving: Option<String>,
}

impl GenerationView {
    /// Generation cache-first requests read from and write to: the activated
    /// one, or the configured one while nothing has been activated.
    pub fn cache(&self) -> &str {
        self.serving.as_deref().unwrap_or(&self.current)
    }
}

/// Outcome of routing one request.
#[derive(Debug)]
pub struct Routed {
    pub response: Response,
    pub classification: Classification,
    pub source: ResponseSource,
    /// Pending store write for a freshly cached response. Awaiting it is optional.
    pub cache_write: Option<JoinHandle<()>>,
}

impl Routed {
    fn new(classification: Classification, source: ResponseSource, response: Response) -> Self {
        Self { response, classification, source, cache_write: None }
    }
}

/// Executes routing decisions against the network and the artifact store.
#[derive(Clone)]
pub struct Router {
    network: Arc<dyn Network>,
    artifacts: Arc<dyn ArtifactStore>,
    policy: RoutePolicy,
    writes: TaskTracker,
}

impl Router {
    pub fn new(network: Arc<dyn Network>, artifacts: Arc<dyn ArtifactStore>, policy: RoutePolicy) -> Self {
        Self { network, artifacts, policy, writes: TaskTracker::new() }
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    /// Route one request. Never fails.
    pub async fn route(&self, request: Request, generations: &GenerationView) -> Routed {
        match self.policy.cache_url(&request) {
            Some(url) => self.cache_first(request, url, generations).await,
            None => self.network_only(request).await,
        }
    }

    /// Wait until every spawned cache write has finished.
    pub async fn settle(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Number of cache writes still in flight.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    async fn network_only(&self, request: Request) -> Routed {
        match self.network.send(&request).await {
            Ok(response) => Routed::new(Classification::NetworkOnly, ResponseSource::Network, response),
            Err(err) => {
                tracing::warn!(method = %request.method, url = %request.url, error = %err, "network-only request failed");
                Routed::new(Classification::NetworkOnly, ResponseSource::Synthetic, Response::network_failed())
            }
        }
    }

    async fn cache_first(&self, mut request: Request, url: Url, generations: &GenerationView) -> Routed {
        let key = compute_artifact_key(&request.method, url.as_str());

        let generation = generations.cache();
        match self.artifacts.get_artifact(generation, &key).await {
            Ok(Some(artifact)) => {
                tracing::debug!(url = %url, %generation, "cache hit");
                return Routed::new(Classification::CacheFirst, ResponseSource::Cache, artifact.response);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "artifact lookup failed, falling back to network");
            }
        }

        request.url = url.to_string();
        match self.network.send(&request).await {
            Ok(response) => {
                let mut routed = Routed::new(Classification::CacheFirst, ResponseSource::Network, response);
                if routed.response.status == 200 && routed.response.kind == ResponseKind::Basic {
                    let artifact = Artifact::capture(&request.method, url.as_str(), routed.response.clone());
                    let create = generations.serving.is_none();
                    routed.cache_write = Some(self.spawn_write(generation.to_string(), create, artifact));
                }
                routed
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "network request failed");
                if request.destination == Destination::Document
                    && let Some(response) = self.offline_page(generations).await
                {
                    return Routed::new(Classification::CacheFirst, ResponseSource::OfflineFallback, response);
                }
                Routed::new(Classification::CacheFirst, ResponseSource::Synthetic, Response::network_error())
            }
        }
    }

    async fn offline_page(&self, generations: &GenerationView) -> Option<Response> {
        let generation = generations.cache();
        let key = compute_artifact_key("GET", self.policy.root_url().as_str());
        match self.artifacts.get_artifact(generation, &key).await {
            Ok(artifact) => artifact.map(|a| a.response),
            Err(err) => {
                tracing::warn!(error = %err, "offline page lookup failed");
                None
            }
        }
    }

    /// `create` registers the generation first; it is only set while nothing
    /// is activated, so a write never recreates a purged generation.
    fn spawn_write(&self, generation: String, create: bool, artifact: Artifact) -> JoinHandle<()> {
        let artifacts = Arc::clone(&self.artifacts);
        self.writes.spawn(async move {
            match store(artifacts.as_ref(), &generation, create, &artifact).await {
                Ok(()) => tracing::debug!(url = %artifact.url, %generation, "response cached"),
                Err(err) => tracing::warn!(url = %artifact.url, %generation, error = %err, "cache write failed"),
            }
        })
    }
}

async fn store(artifacts: &dyn ArtifactStore, generation: &str, create: bool, artifact: &Artifact) -> Result<(), Error> {
    if create {
        artifacts.create_generation(generation).await?;
    }
    artifacts.put_artifact(generation, artifact).await
}
