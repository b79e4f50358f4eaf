//! Error types for the proxy client.

use protocol::CloseReason;
use thiserror::Error;

/// Errors returned by [`AdminClient`](crate::AdminClient) and the stream types.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid proxy URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme: {0} (expected http or https)")]
    UnsupportedScheme(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("proxy returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("stream closed by proxy: {0}")]
    Closed(CloseReason),
}

impl ClientError {
    /// HTTP status of an admin error response, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::Api {
            status: 404,
            message: "session not found: job-1".to_string(),
        };
        assert_eq!(err.to_string(), "proxy returned 404: session not found: job-1");
        assert_eq!(err.status(), Some(404));

        let err = ClientError::Closed(CloseReason::WriterConflict);
        assert_eq!(
            err.to_string(),
            "stream closed by proxy: writer already connected (4001)"
        );
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_url_error_conversion() {
        let err: ClientError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }
}
