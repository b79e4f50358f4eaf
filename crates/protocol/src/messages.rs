//! Wire vocabulary shared by the proxy daemon and its clients.
//!
//! Admin responses are JSON bodies; streaming connections are WebSocket text
//! frames terminated by a close frame whose code is a [`CloseReason`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Name reported by the liveness probe.
pub const SERVICE_NAME: &str = "log_listener_proxy";

/// Path prefix of the admin session routes.
pub const SESSION_ROUTE: &str = "logging_session";

/// Path prefix of the streaming routes.
pub const STREAM_ROUTE: &str = "logs";

/// Close-frame reason text sent after the end-of-stream marker.
pub const END_OF_STREAM: &str = "end of stream";

/// One of the two relayed output streams of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Both stream kinds, in a stable order.
    pub const ALL: [StreamKind; 2] = [StreamKind::Stdout, StreamKind::Stderr];

    /// Returns the path segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(StreamKind::Stdout),
            "stderr" => Ok(StreamKind::Stderr),
            other => Err(ProtocolError::UnknownStreamKind(other.to_string())),
        }
    }
}

/// Role a streaming connection plays on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Receives published messages and the end-of-stream marker.
    #[serde(rename = "read")]
    Reader,
    /// The single producer of a channel.
    #[serde(rename = "write")]
    Writer,
}

impl Role {
    /// Returns the path segment for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "read",
            Role::Writer => "write",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Role::Reader),
            "write" => Ok(Role::Writer),
            other => Err(ProtocolError::UnknownRole(other.to_string())),
        }
    }
}

/// Reason a streaming connection was closed by the proxy.
///
/// Each reason maps to a WebSocket close code. Application codes live in the
/// 4000-4999 private range; a drained channel closes with the standard 1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Writer finished and the linger window is over.
    NormalClosure,
    /// Another writer is already attached to the channel.
    WriterConflict,
    /// The session was deleted or expired.
    SessionDeleted,
    /// The reader fell too far behind the writer.
    BufferOverflow,
    /// The connection referenced a session that does not exist.
    SessionNotFound,
}

impl CloseReason {
    /// Returns the WebSocket close code for this reason.
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::NormalClosure => 1000,
            CloseReason::WriterConflict => 4001,
            CloseReason::SessionDeleted => 4002,
            CloseReason::BufferOverflow => 4003,
            CloseReason::SessionNotFound => 4004,
        }
    }

    /// Maps a WebSocket close code back to a reason.
    pub fn from_code(code: u16) -> Result<Self, ProtocolError> {
        match code {
            1000 => Ok(CloseReason::NormalClosure),
            4001 => Ok(CloseReason::WriterConflict),
            4002 => Ok(CloseReason::SessionDeleted),
            4003 => Ok(CloseReason::BufferOverflow),
            4004 => Ok(CloseReason::SessionNotFound),
            other => Err(ProtocolError::UnknownCloseCode(other)),
        }
    }

    /// Human-readable text sent alongside the close code.
    pub fn description(&self) -> &'static str {
        match self {
            CloseReason::NormalClosure => "normal closure",
            CloseReason::WriterConflict => "writer already connected",
            CloseReason::SessionDeleted => "session deleted",
            CloseReason::BufferOverflow => "reader buffer overflow",
            CloseReason::SessionNotFound => "session not found",
        }
    }

    /// Whether this reason ends a connection without any fault.
    pub fn is_normal(&self) -> bool {
        matches!(self, CloseReason::NormalClosure)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Response body of the admin session operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    /// `ok` or `error`.
    pub status: String,
    pub session_id: String,
    pub message: String,
}

impl SessionResponse {
    pub fn ok(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Writer-slot state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No writer attached.
    Idle,
    /// A writer is attached and publishing.
    WriterActive,
    /// The writer left; attached readers get the end-of-stream marker until the linger window ends.
    Draining,
    /// The owning session is gone.
    Closed,
}

/// Snapshot of one channel of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub kind: StreamKind,
    pub state: ChannelState,
    pub writer_attached: bool,
    pub readers: usize,
    /// Writer cycles that have fully drained.
    pub cycles_completed: u64,
    pub messages_published: u64,
}

/// Snapshot of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: u64,
    /// Absolute expiry deadline, seconds since the Unix epoch.
    pub expires_at: u64,
    pub channels: Vec<ChannelInfo>,
}

impl SessionInfo {
    /// Returns the snapshot of the channel for `kind`, if present.
    pub fn channel(&self, kind: StreamKind) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.kind == kind)
    }
}

/// Body of the liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub name: String,
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            name: SERVICE_NAME.to_string(),
            status: "ok".to_string(),
        }
    }
}

/// Admin path of a session, e.g. `/logging_session/job-1`.
pub fn session_path(session_id: &str) -> String {
    format!("/{SESSION_ROUTE}/{session_id}")
}

/// Streaming path of a channel, e.g. `/logs/job-1/read/stdout`.
pub fn stream_path(session_id: &str, role: Role, kind: StreamKind) -> String {
    format!("/{STREAM_ROUTE}/{session_id}/{role}/{kind}")
}
