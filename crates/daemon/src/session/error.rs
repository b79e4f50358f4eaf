//! Relay error taxonomy.

use protocol::{CloseReason, StreamKind};
use thiserror::Error;

use super::SessionId;

/// Errors returned by registry and channel operations.
///
/// Admin failures (`AlreadyExists`, `NotFound`, `InvalidSessionId`) never
/// mutate state. Streaming failures map onto a [`CloseReason`] and only affect
/// the connection that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// A live session already uses this identifier.
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    /// No live session uses this identifier.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The channel already has an attached writer.
    #[error("a writer is already attached to the {0} channel")]
    WriterConflict(StreamKind),

    /// The channel belongs to a session that has been torn down.
    #[error("the {0} channel belongs to a session that no longer exists")]
    SessionNotFound(StreamKind),

    /// The identifier cannot be used as a URL path segment.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// A publish came from a connection that does not hold the writer slot.
    #[error("connection is not the active writer of the {0} channel")]
    NotWriter(StreamKind),
}

impl RelayError {
    /// Close reason to send to a streaming connection that hit this error.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            RelayError::WriterConflict(_) => CloseReason::WriterConflict,
            RelayError::NotWriter(_) => CloseReason::NormalClosure,
            RelayError::AlreadyExists(_)
            | RelayError::NotFound(_)
            | RelayError::SessionNotFound(_)
            | RelayError::InvalidSessionId(_) => CloseReason::SessionNotFound,
        }
    }
}
