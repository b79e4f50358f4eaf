//! # Log Listener Proxy Protocol Library
//!
//! Shared vocabulary between the proxy daemon and its clients.
//!
//! ## Overview
//!
//! A batch job streams its console output to the proxy over two WebSocket
//! connections (one per [`StreamKind`]); any number of viewers read the same
//! streams live. This crate defines what both sides agree on:
//!
//! - **Routes**: admin paths (`/logging_session/{id}`) and streaming paths
//!   (`/logs/{id}/{read|write}/{stdout|stderr}`)
//! - **Close reasons**: the WebSocket close codes a streaming connection can
//!   end with
//! - **Admin bodies**: JSON responses of the session operations and the
//!   liveness probe
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{stream_path, CloseReason, Role, StreamKind};
//!
//! let path = stream_path("job-42", Role::Reader, StreamKind::Stdout);
//! assert_eq!(path, "/logs/job-42/read/stdout");
//!
//! let reason = CloseReason::from_code(4001).unwrap();
//! assert_eq!(reason, CloseReason::WriterConflict);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Stream kinds, roles, close reasons, and admin bodies
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    session_path, stream_path, ChannelInfo, ChannelState, CloseReason, HealthResponse, Role,
    SessionInfo, SessionResponse, StreamKind, END_OF_STREAM, SERVICE_NAME, SESSION_ROUTE,
    STREAM_ROUTE,
};
