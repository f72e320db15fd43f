//! Network access for the agent.
//!
//! ### Contract
//! - [`Network::send`] resolves to a response for any status the server
//!   returns; only a failed call (DNS, connect, reset, timeout) is an error.
//! - No timeout is imposed unless the configuration sets one.
//! - Responses from the agent origin are tagged [`ResponseKind::Basic`];
//!   everything else is [`ResponseKind::Cors`].

pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};

use offgrid_core::{AppConfig, Error, Request, Response, ResponseKind};

pub use self::url::{UrlError, resolve, same_origin};

/// Something that can deliver a request.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, Error>;
}

/// Configuration for the HTTP network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Origin relative URLs resolve against.
    pub origin: ::url::Url,

    /// User agent string (default: "offgrid/0.1")
    pub user_agent: String,

    /// Request timeout (default: none)
    pub timeout: Option<Duration>,
}

impl NetworkConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, Error> {
        let origin = ::url::Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self { origin, user_agent: config.user_agent.clone(), timeout: config.timeout() })
    }
}

/// reqwest-backed [`Network`].
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    http: Client,
    origin: ::url::Url,
}

impl HttpNetwork {
    /// Create a new network with the given configuration.
    pub fn new(config: NetworkConfig) -> Result<Self, Error> {
        let mut builder =
            Client::builder().user_agent(&config.user_agent).use_rustls_tls().gzip(true).brotli(true).deflate(true);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let http =
            builder.build().map_err(|e| Error::NetworkUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, origin: config.origin })
    }

    pub fn origin(&self) -> &::url::Url {
        &self.origin
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn send(&self, request: &Request) -> Result<Response, Error> {
        let start = Instant::now();
        let url = resolve(&self.origin, &request.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::InvalidInput(format!("invalid method: {}", request.method)))?;

        let mut builder = self.http.request(method, url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                Error::InvalidInput(format!("malformed request: {e}"))
            } else {
                Error::NetworkUnavailable(format!("network error: {e}"))
            }
        })?;

        let status = response.status();
        let final_url = response.url().clone();
        let kind = if same_origin(&final_url, &self.origin) { ResponseKind::Basic } else { ResponseKind::Cors };
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::NetworkUnavailable(format!("failed to read response: {e}")))?;

        tracing::debug!(
            method = %request.method,
            url = %url,
            final_url = %final_url,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "network request completed"
        );

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            kind,
        })
    }
}
