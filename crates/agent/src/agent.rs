//! The agent state machine and its event loop.
//!
//! ```text
//! Idle --install--> Installing --ok--> Ready --activate--> Activating --ok--> Serving
//!   ^                   |                ^                     |
//!   +------ failed -----+                +------- failed ------+
//! ```
//!
//! Fetches are served in every state from the last activated generation, so a
//! failed install leaves the previous generation in service. Until the first
//! activation, responses are cached under the configured generation instead.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use offgrid_core::{AgentMessage, AppConfig, ArtifactStore, Error, MutationQueue, QueuedMutation, Request};

use crate::lifecycle::{ActivationReport, InstallReport, LifecycleManager};
use crate::net::Network;
use crate::queue::{DeferredQueue, DrainReport};
use crate::router::{GenerationView, RoutePolicy, Routed, Router};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Installing,
    Ready,
    Activating,
    Serving,
}

/// Snapshot of the agent for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub current_generation: String,
    pub serving_generation: Option<String>,
    pub pending_mutations: Option<u64>,
}

/// Events accepted by [`Agent::run`].
#[derive(Debug)]
pub enum AgentEvent {
    Install { reply: oneshot::Sender<Result<InstallReport, Error>> },
    Activate { reply: oneshot::Sender<Result<ActivationReport, Error>> },
    Fetch { request: Request, reply: oneshot::Sender<Routed> },
    Message { message: AgentMessage, reply: oneshot::Sender<Result<QueuedMutation, Error>> },
    Sync { tag: String, reply: oneshot::Sender<Result<Option<DrainReport>, Error>> },
    Status { reply: oneshot::Sender<AgentStatus> },
}

#[derive(Debug)]
struct Lifecycle {
    state: AgentState,
    serving: Option<String>,
}

struct Inner {
    router: Router,
    lifecycle: LifecycleManager,
    queue: DeferredQueue,
    manifest: Vec<String>,
    sync_tag: String,
    status: RwLock<Lifecycle>,
    tasks: TaskTracker,
}

/// The interception and offline-resilience agent.
///
/// Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    /// Build an agent from configuration and injected stores.
    ///
    /// The last activated generation recorded in `artifacts` starts out as the
    /// serving generation.
    pub async fn new(
        config: &AppConfig, network: Arc<dyn Network>, artifacts: Arc<dyn ArtifactStore>,
        queue: Arc<dyn MutationQueue>,
    ) -> Result<Self, Error> {
        let origin = url::Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let serving = match artifacts.active_generation().await {
            Ok(serving) => serving,
            Err(err) => {
                tracing::warn!(error = %err, "could not read active generation; starting without cache");
                None
            }
        };

        let policy = RoutePolicy { origin: origin.clone(), api_prefix: config.api_prefix.clone() };
        let inner = Inner {
            router: Router::new(Arc::clone(&network), Arc::clone(&artifacts), policy),
            lifecycle: LifecycleManager::new(Arc::clone(&network), artifacts, origin, config.generation.clone()),
            queue: DeferredQueue::new(queue, network),
            manifest: config.manifest.clone(),
            sync_tag: config.sync_tag.clone(),
            status: RwLock::new(Lifecycle { state: AgentState::Idle, serving }),
            tasks: TaskTracker::new(),
        };

        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    pub fn queue(&self) -> &DeferredQueue {
        &self.inner.queue
    }

    pub async fn state(&self) -> AgentState {
        self.inner.status.read().await.state
    }

    pub async fn status(&self) -> AgentStatus {
        let (state, serving_generation) = {
            let status = self.inner.status.read().await;
            (status.state, status.serving.clone())
        };
        let pending_mutations = match self.inner.queue.pending_count().await {
            Ok(count) => Some(count),
            Err(err) => {
                tracing::warn!(error = %err, "could not count pending mutations");
                None
            }
        };
        AgentStatus {
            state,
            current_generation: self.inner.lifecycle.generation().to_string(),
            serving_generation,
            pending_mutations,
        }
    }

    /// Pre-warm the current generation. Allowed from `Idle`.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        self.transition(AgentState::Idle, AgentState::Installing).await?;

        match self.inner.lifecycle.install(&self.inner.manifest).await {
            Ok(report) => {
                self.set_state(AgentState::Ready).await;
                Ok(report)
            }
            Err(err) => {
                tracing::error!(error = %err, "install failed; previous generation stays authoritative");
                self.set_state(AgentState::Idle).await;
                Err(err)
            }
        }
    }

    /// Purge stale generations and start serving the current one. Allowed from `Ready`.
    pub async fn activate(&self) -> Result<ActivationReport, Error> {
        self.transition(AgentState::Ready, AgentState::Activating).await?;

        match self.inner.lifecycle.activate().await {
            Ok(report) => {
                let mut status = self.inner.status.write().await;
                status.serving = Some(report.generation.clone());
                status.state = AgentState::Serving;
                tracing::info!(generation = %report.generation, "agent serving");
                Ok(report)
            }
            Err(err) => {
                tracing::error!(error = %err, "activation failed");
                self.set_state(AgentState::Ready).await;
                Err(err)
            }
        }
    }

    /// Install then activate.
    pub async fn start(&self) -> Result<ActivationReport, Error> {
        self.install().await?;
        self.activate().await
    }

    /// Route one intercepted request.
    pub async fn fetch(&self, request: Request) -> Routed {
        let generations = self.generations().await;
        self.inner.router.route(request, &generations).await
    }

    /// Handle an out-of-band message from the application.
    pub async fn message(&self, message: AgentMessage) -> Result<QueuedMutation, Error> {
        match message {
            AgentMessage::SaveMutation { mutation } => self.inner.queue.enqueue(mutation).await,
        }
    }

    /// Drain the mutation queue if `tag` is the configured sync tag.
    pub async fn sync(&self, tag: &str) -> Result<Option<DrainReport>, Error> {
        if tag != self.inner.sync_tag {
            tracing::debug!(tag, "ignoring sync with unknown tag");
            return Ok(None);
        }
        tracing::info!(tag, "background sync triggered");
        self.inner.queue.drain().await.map(Some)
    }

    /// Wait for every spawned fetch task and cache write.
    pub async fn settle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
        self.inner.router.settle().await;
    }

    /// Process events until the channel closes.
    ///
    /// Lifecycle events and syncs run to completion before the next event is
    /// taken; fetches run as independent tasks.
    pub async fn run(self, mut events: mpsc::Receiver<AgentEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Install { reply } => {
                    let _ = reply.send(self.install().await);
                }
                AgentEvent::Activate { reply } => {
                    let _ = reply.send(self.activate().await);
                }
                AgentEvent::Fetch { request, reply } => {
                    let agent = self.clone();
                    self.inner.tasks.spawn(async move {
                        let _ = reply.send(agent.fetch(request).await);
                    });
                }
                AgentEvent::Message { message, reply } => {
                    let _ = reply.send(self.message(message).await);
                }
                AgentEvent::Sync { tag, reply } => {
                    let _ = reply.send(self.sync(&tag).await);
                }
                AgentEvent::Status { reply } => {
                    let _ = reply.send(self.status().await);
                }
            }
        }

        tracing::debug!("event source closed; waiting for in-flight work");
        self.settle().await;
    }

    /// Start the event loop on the current runtime.
    pub fn spawn(self, capacity: usize) -> (AgentHandle, JoinHandle<()>) {
        let (events, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.run(rx));
        (AgentHandle { events }, task)
    }

    async fn generations(&self) -> GenerationView {
        let status = self.inner.status.read().await;
        GenerationView { current: self.inner.lifecycle.generation().to_string(), serving: status.serving.clone() }
    }

    async fn transition(&self, from: AgentState, to: AgentState) -> Result<(), Error> {
        let mut status = self.inner.status.write().await;
        if status.state != from {
            return Err(Error::InvalidState(format!("cannot move to {to:?} from {:?}", status.state)));
        }
        tracing::debug!(?from, ?to, "agent state changed");
        status.state = to;
        Ok(())
    }

    async fn set_state(&self, to: AgentState) {
        let mut status = self.inner.status.write().await;
        tracing::debug!(from = ?status.state, ?to, "agent state changed");
        status.state = to;
    }
}

/// Sender side of a running [`Agent::run`] loop.
#[derive(Clone)]
pub struct AgentHandle {
    events: mpsc::Sender<AgentEvent>,
}

impl AgentHandle {
    pub async fn install(&self) -> Result<InstallReport, Error> {
        self.request(|reply| AgentEvent::Install { reply }).await?
    }

    pub async fn activate(&self) -> Result<ActivationReport, Error> {
        self.request(|reply| AgentEvent::Activate { reply }).await?
    }

    pub async fn fetch(&self, request: Request) -> Result<Routed, Error> {
        self.request(|reply| AgentEvent::Fetch { request, reply }).await
    }

    pub async fn message(&self, message: AgentMessage) -> Result<QueuedMutation, Error> {
        self.request(|reply| AgentEvent::Message { message, reply }).await?
    }

    pub async fn sync(&self, tag: impl Into<String>) -> Result<Option<DrainReport>, Error> {
        let tag = tag.into();
        self.request(|reply| AgentEvent::Sync { tag, reply }).await?
    }

    pub async fn status(&self) -> Result<AgentStatus, Error> {
        self.request(|reply| AgentEvent::Status { reply }).await
    }

    async fn request<T>(&self, event: impl FnOnce(oneshot::Sender<T>) -> AgentEvent) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.events.send(event(reply)).await.map_err(|_| Error::InvalidState("agent event loop stopped".into()))?;
        rx.await.map_err(|_| Error::InvalidState("agent dropped the request".into()))
    }
}
