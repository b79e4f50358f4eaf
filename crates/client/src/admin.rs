//! HTTP client for the proxy's admin routes.

use protocol::{
    session_path, stream_path, HealthResponse, Role, SessionInfo, SessionResponse, StreamKind,
    SESSION_ROUTE,
};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ClientError, Result};

/// Default proxy address used by the CLI.
pub const DEFAULT_PROXY_URL: &str = "http://localhost:8160";

/// Client for session administration.
///
/// Holds the proxy base URL and derives the streaming URLs from it, so one
/// value configures both HTTP and WebSocket access.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    base: Url,
}

impl AdminClient {
    /// Creates a client for the proxy at `base_url` (`http` or `https`).
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)?;
        match base.scheme() {
            "http" | "https" => {}
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// Returns the proxy base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Creates a session.
    pub async fn create(&self, session_id: &str) -> Result<SessionResponse> {
        let url = self.url(&session_path(session_id));
        self.send(Method::POST, url).await
    }

    /// Deletes a session, closing every connection attached to it.
    pub async fn delete(&self, session_id: &str) -> Result<SessionResponse> {
        let url = self.url(&session_path(session_id));
        self.send(Method::DELETE, url).await
    }

    /// Describes a live session.
    pub async fn info(&self, session_id: &str) -> Result<SessionInfo> {
        let url = self.url(&session_path(session_id));
        self.send(Method::GET, url).await
    }

    /// Lists live sessions.
    pub async fn list(&self) -> Result<Vec<SessionInfo>> {
        let url = self.url(&format!("/{SESSION_ROUTE}"));
        self.send(Method::GET, url).await
    }

    /// Calls the liveness probe.
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/health");
        self.send(Method::GET, url).await
    }

    /// WebSocket URL of a channel: the base URL with `ws`/`wss` scheme.
    pub fn stream_url(&self, session_id: &str, role: Role, kind: StreamKind) -> Url {
        let mut url = self.url(&stream_path(session_id, role, kind));
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        // http(s) -> ws(s) is always an allowed scheme change
        let _ = url.set_scheme(scheme);
        url
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, url: Url) -> Result<T> {
        tracing::debug!("{} {}", method, url);
        let response = self.http.request(method, url).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<SessionResponse>(&body) {
        Ok(error) => error.message,
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => body,
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_scheme() {
        assert!(matches!(
            AdminClient::new("ftp://proxy:8160"),
            Err(ClientError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            AdminClient::new("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_stream_url_maps_scheme() {
        let client = AdminClient::new("http://proxy:8160").unwrap();
        assert_eq!(
            client
                .stream_url("job-1", Role::Reader, StreamKind::Stdout)
                .as_str(),
            "ws://proxy:8160/logs/job-1/read/stdout"
        );

        let client = AdminClient::new("https://proxy.example.com").unwrap();
        assert_eq!(
            client
                .stream_url("job-1", Role::Writer, StreamKind::Stderr)
                .as_str(),
            "wss://proxy.example.com/logs/job-1/write/stderr"
        );
    }

    #[test]
    fn test_admin_url_replaces_path() {
        let client = AdminClient::new("http://proxy:8160/ignored?x=1").unwrap();
        assert_eq!(
            client.url(&session_path("job-1")).as_str(),
            "http://proxy:8160/logging_session/job-1"
        );
    }
}
