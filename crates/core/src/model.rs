//! Request, response, and record types shared by the agent and its stores.
//!
//! Bodies are immutable [`Bytes`] buffers, so a response handed to a caller and the
//! copy written to the artifact store never share a read cursor.

use std::collections::BTreeMap;

use bytes::Bytes;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ordered header list. Names keep the case they arrived with.
pub type Headers = Vec<(String, String)>;

/// Method eligible for caching.
pub const SAFE_METHOD: &str = "GET";

/// Where an intercepted request is headed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Top-level navigation.
    Document,
    /// Anything else (scripts, images, XHR).
    #[default]
    Other,
}

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub destination: Destination,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            destination: Destination::Other,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(SAFE_METHOD, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// True for the read-only method that may be served from cache.
    pub fn is_safe(&self) -> bool {
        self.method.eq_ignore_ascii_case(SAFE_METHOD)
    }
}

/// Visibility of a response relative to the agent's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response; the only kind that is ever cached.
    Basic,
    /// Cross-origin response with readable body.
    Cors,
    /// Cross-origin response without readable body.
    Opaque,
    /// Constructed locally by the agent.
    Default,
}

/// A response snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Bytes,
    pub kind: ResponseKind,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, status_text: String::new(), headers: Vec::new(), body: body.into(), kind: ResponseKind::Basic }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Synthetic failure for requests that must never reach the cache.
    pub fn network_failed() -> Self {
        let body = serde_json::json!({ "error": "Network request failed" }).to_string();
        Self {
            status: 503,
            status_text: "Service Unavailable".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Bytes::from(body),
            kind: ResponseKind::Default,
        }
    }

    /// Synthetic failure for cacheable requests with nothing to fall back to.
    pub fn network_error() -> Self {
        Self {
            status: 503,
            status_text: "Service Unavailable".into(),
            headers: vec![("Content-Type".into(), "text/plain".into())],
            body: Bytes::from_static(b"Network error"),
            kind: ResponseKind::Default,
        }
    }

    /// Status in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A cached response keyed by normalized request identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub method: String,
    pub url: String,
    pub response: Response,
    pub stored_at: String,
}

impl Artifact {
    /// Capture a response for `method url`. `url` must already be canonical.
    pub fn capture(method: &str, url: &str, response: Response) -> Self {
        let method = method.to_ascii_uppercase();
        Self {
            key: crate::store::hash::compute_artifact_key(&method, url),
            method,
            url: url.to_string(),
            response,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A write request the application wants delivered once the network is back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MutationDraft {
    pub url: String,
    #[serde(default = "default_mutation_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_mutation_method() -> String {
    "POST".into()
}

/// A mutation recorded in the deferred queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueuedMutation {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub enqueued_at: String,
}

impl QueuedMutation {
    /// The exact request to replay.
    pub fn to_request(&self) -> Request {
        let mut request = Request::new(&self.method, &self.url);
        request.headers = self.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        request.body = self.body.clone().map(Bytes::from);
        request
    }
}

/// Out-of-band messages from the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    /// Persist a failed mutation for delivery on the next sync.
    #[serde(alias = "SAVE_OFFLINE_FORM")]
    SaveMutation {
        #[serde(alias = "formData")]
        mutation: MutationDraft,
    },
}
