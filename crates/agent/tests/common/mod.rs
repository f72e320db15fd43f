#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use offgrid_agent::{Agent, Network, net::resolve};
use offgrid_core::{
    AgentDb, AppConfig, Artifact, ArtifactStore, Error, MutationQueue, Request, Response, ResponseKind,
};
use url::Url;

pub const ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Scripted network
// ============================================================================

#[derive(Clone)]
pub enum Reply {
    Respond(Response),
    Fail,
}

/// Network double keyed by `METHOD path?query`.
#[derive(Default)]
pub struct ScriptedNetwork {
    replies: Mutex<HashMap<String, Reply>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: &str, path: &str, response: Response) {
        self.replies.lock().unwrap().insert(format!("{method} {path}"), Reply::Respond(response));
    }

    pub fn fail(&self, method: &str, path: &str) {
        self.replies.lock().unwrap().insert(format!("{method} {path}"), Reply::Fail);
    }

    /// Unplug: every call fails regardless of script.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn call_key(request: &Request) -> String {
    let origin = Url::parse(ORIGIN).unwrap();
    let target = match resolve(&origin, &request.url) {
        Ok(url) if url.origin() == origin.origin() => match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        },
        Ok(url) => url.to_string(),
        Err(_) => request.url.clone(),
    };
    format!("{} {target}", request.method)
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn send(&self, request: &Request) -> Result<Response, Error> {
        let key = call_key(request);
        self.calls.lock().unwrap().push(key.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::NetworkUnavailable("offline".into()));
        }

        let reply = self.replies.lock().unwrap().get(&key).cloned();
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail) => Err(Error::NetworkUnavailable(format!("scripted failure for {key}"))),
            None => Ok(Response::new(404, "not found")),
        }
    }
}

pub fn html(body: &str) -> Response {
    Response::new(200, body.to_string()).with_header("Content-Type", "text/html")
}

pub fn json(status: u16, body: &str) -> Response {
    Response::new(status, body.to_string()).with_header("Content-Type", "application/json")
}

pub fn cross_origin(body: &str) -> Response {
    Response::new(200, body.to_string()).with_kind(ResponseKind::Cors)
}

// ============================================================================
// Store doubles
// ============================================================================

/// Counts artifact store access on top of an in-memory database.
pub struct CountingStore {
    inner: AgentDb,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: AgentDb) -> Arc<Self> {
        Arc::new(Self { inner, reads: AtomicUsize::new(0), writes: AtomicUsize::new(0) })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for CountingStore {
    async fn get_artifact(&self, generation: &str, key: &str) -> Result<Option<Artifact>, Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_artifact(generation, key).await
    }

    async fn create_generation(&self, tag: &str) -> Result<(), Error> {
        self.inner.create_generation(tag).await
    }

    async fn put_artifact(&self, generation: &str, artifact: &Artifact) -> Result<(), Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put_artifact(generation, artifact).await
    }

    async fn install_artifacts(&self, generation: &str, artifacts: &[Artifact]) -> Result<(), Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.install_artifacts(generation, artifacts).await
    }

    async fn is_installed(&self, tag: &str) -> Result<bool, Error> {
        self.inner.is_installed(tag).await
    }

    async fn list_artifacts(&self, generation: &str) -> Result<Vec<Artifact>, Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_artifacts(generation).await
    }

    async fn generations(&self) -> Result<Vec<String>, Error> {
        self.inner.generations().await
    }

    async fn delete_generation(&self, tag: &str) -> Result<u64, Error> {
        self.inner.delete_generation(tag).await
    }

    async fn mark_activated(&self, tag: &str) -> Result<(), Error> {
        self.inner.mark_activated(tag).await
    }

    async fn active_generation(&self) -> Result<Option<String>, Error> {
        self.inner.active_generation().await
    }
}

/// Artifact store whose reads and writes always fault.
pub struct BrokenStore {
    pub active: Option<String>,
}

fn fault() -> Error {
    Error::CorruptRecord("disk on fire".into())
}

#[async_trait]
impl ArtifactStore for BrokenStore {
    async fn get_artifact(&self, _: &str, _: &str) -> Result<Option<Artifact>, Error> {
        Err(fault())
    }

    async fn create_generation(&self, _: &str) -> Result<(), Error> {
        Err(fault())
    }

    async fn put_artifact(&self, _: &str, _: &Artifact) -> Result<(), Error> {
        Err(fault())
    }

    async fn install_artifacts(&self, _: &str, _: &[Artifact]) -> Result<(), Error> {
        Err(fault())
    }

    async fn is_installed(&self, _: &str) -> Result<bool, Error> {
        Err(fault())
    }

    async fn list_artifacts(&self, _: &str) -> Result<Vec<Artifact>, Error> {
        Err(fault())
    }

    async fn generations(&self) -> Result<Vec<String>, Error> {
        Err(fault())
    }

    async fn delete_generation(&self, _: &str) -> Result<u64, Error> {
        Err(fault())
    }

    async fn mark_activated(&self, _: &str) -> Result<(), Error> {
        Err(fault())
    }

    async fn active_generation(&self) -> Result<Option<String>, Error> {
        Ok(self.active.clone())
    }
}

// ============================================================================
// Agent fixtures
// ============================================================================

pub fn config(generation: &str, manifest: &[&str]) -> AppConfig {
    AppConfig {
        origin: ORIGIN.into(),
        generation: generation.into(),
        manifest: manifest.iter().map(|entry| entry.to_string()).collect(),
        ..Default::default()
    }
}

pub struct Fixture {
    pub agent: Agent,
    pub network: Arc<ScriptedNetwork>,
    pub store: Arc<CountingStore>,
    pub db: AgentDb,
}

/// Agent over a fresh in-memory database.
pub async fn fixture(config: &AppConfig) -> Fixture {
    let db = AgentDb::open_in_memory().await.unwrap();
    fixture_on(config, db, ScriptedNetwork::new()).await
}

/// Agent over an existing database and network, as after a restart.
pub async fn fixture_on(config: &AppConfig, db: AgentDb, network: Arc<ScriptedNetwork>) -> Fixture {
    let store = CountingStore::new(db.clone());
    let queue: Arc<dyn MutationQueue> = Arc::new(db.clone());
    let agent = Agent::new(config, network.clone(), store.clone(), queue).await.unwrap();
    Fixture { agent, network, store, db }
}

/// Fixture already installed and serving `generation` with the given manifest responses.
pub async fn serving(generation: &str) -> Fixture {
    let fixture = fixture(&config(generation, &["/"])).await;
    fixture.network.respond("GET", "/", html("<h1>start</h1>"));
    fixture.agent.start().await.unwrap();
    fixture.store.reset();
    fixture
}

pub fn key(url: &str) -> String {
    let origin = Url::parse(ORIGIN).unwrap();
    let url = resolve(&origin, url).unwrap();
    offgrid_core::store::hash::compute_artifact_key("GET", url.as_str())
}
