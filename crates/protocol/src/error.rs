//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering wire-level parsing failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A path segment did not name a known stream kind.
    #[error("unknown stream kind: {0} (expected stdout or stderr)")]
    UnknownStreamKind(String),

    /// A path segment did not name a known connection role.
    #[error("unknown role: {0} (expected read or write)")]
    UnknownRole(String),

    /// A close frame carried a code outside the relay's vocabulary.
    #[error("unknown close code: {0}")]
    UnknownCloseCode(u16),

    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_stream_kind_display() {
        let err = ProtocolError::UnknownStreamKind("stdin".to_string());
        assert_eq!(
            err.to_string(),
            "unknown stream kind: stdin (expected stdout or stderr)"
        );
    }

    #[test]
    fn test_unknown_role_display() {
        let err = ProtocolError::UnknownRole("watch".to_string());
        assert_eq!(err.to_string(), "unknown role: watch (expected read or write)");
    }

    #[test]
    fn test_unknown_close_code_display() {
        let err = ProtocolError::UnknownCloseCode(4999);
        assert_eq!(err.to_string(), "unknown close code: 4999");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
