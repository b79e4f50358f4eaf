//! Listen-port allocation.
//!
//! The daemon either binds a fixed port from its configuration or leases one
//! from an external port manager service at startup and hands it back at
//! shutdown.
//!
//! Port manager protocol:
//! - `GET {base}/v2?portcount=1&name={pod}` returns `{"ports": [p, ...]}`
//! - `DELETE {base}/v2?portcount=1&name={pod}` releases the lease
//!
//! `v2` is joined relative to the configured base URL, so
//! `http://pm/manage` resolves to `http://pm/v2` and `http://pm/manage/`
//! to `http://pm/manage/v2`.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::Config;

/// Errors raised while leasing a port.
#[derive(Debug, Error)]
pub enum PortManagerError {
    #[error("invalid port manager url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("port manager request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("port manager returned no ports")]
    NoPorts,
}

/// Source of the listen port.
#[allow(async_fn_in_trait)]
pub trait PortAllocator: Send + Sync {
    /// Obtains the port to listen on.
    async fn acquire(&self) -> Result<u16, PortManagerError>;

    /// Returns a port obtained from [`acquire`](Self::acquire).
    ///
    /// Failures are logged, never returned; shutdown must proceed.
    async fn release(&self, port: u16);
}

/// Always hands out the configured port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPort(pub u16);

impl PortAllocator for FixedPort {
    async fn acquire(&self) -> Result<u16, PortManagerError> {
        Ok(self.0)
    }

    async fn release(&self, _port: u16) {}
}

#[derive(Debug, Deserialize)]
struct PortsResponse {
    ports: Vec<u16>,
}

/// Leases the listen port from a port manager over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPortManager {
    client: reqwest::Client,
    endpoint: Url,
    pod_name: String,
}

impl HttpPortManager {
    /// Creates a client for the port manager at `base_url`.
    pub fn new(base_url: &str, pod_name: impl Into<String>) -> Result<Self, PortManagerError> {
        let endpoint = Url::parse(base_url)?.join("v2")?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            pod_name: pod_name.into(),
        })
    }

    /// Fully resolved lease endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    fn query(&self) -> [(&'static str, &str); 2] {
        [("portcount", "1"), ("name", self.pod_name.as_str())]
    }
}

impl PortAllocator for HttpPortManager {
    async fn acquire(&self) -> Result<u16, PortManagerError> {
        let response: PortsResponse = self
            .client
            .get(self.endpoint.clone())
            .query(&self.query())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let port = response.ports.first().copied().ok_or(PortManagerError::NoPorts)?;
        tracing::info!(port, pod = %self.pod_name, "Leased port from port manager");
        Ok(port)
    }

    async fn release(&self, port: u16) {
        let result = self
            .client
            .delete(self.endpoint.clone())
            .query(&self.query())
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => tracing::info!(port, pod = %self.pod_name, "Released port to port manager"),
            Err(e) => tracing::error!(port, pod = %self.pod_name, "Failed to release port: {}", e),
        }
    }
}

/// Port source selected by configuration.
#[derive(Debug, Clone)]
pub enum PortSource {
    Fixed(FixedPort),
    Http(HttpPortManager),
}

impl PortSource {
    /// Picks the port source described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, PortManagerError> {
        if config.port_manager.enabled {
            Ok(PortSource::Http(HttpPortManager::new(
                &config.port_manager.url,
                pod_name(),
            )?))
        } else {
            Ok(PortSource::Fixed(FixedPort(config.server.port)))
        }
    }
}

impl PortAllocator for PortSource {
    async fn acquire(&self) -> Result<u16, PortManagerError> {
        match self {
            PortSource::Fixed(p) => p.acquire().await,
            PortSource::Http(p) => p.acquire().await,
        }
    }

    async fn release(&self, port: u16) {
        match self {
            PortSource::Fixed(p) => p.release(port).await,
            PortSource::Http(p) => p.release(port).await,
        }
    }
}

/// Name the port lease is registered under: `$POD_NAME`, else the host name.
pub fn pod_name() -> String {
    if let Ok(name) = std::env::var("POD_NAME") {
        if !name.is_empty() {
            return name;
        }
    }
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "log-listener-proxy".to_string())
}
