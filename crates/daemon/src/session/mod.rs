//! Session registry and stream relay.
//!
//! A session owns two channels (stdout and stderr). Each channel admits one
//! writer and any number of readers and fans every published message out to
//! each reader's private queue. Sessions are removed by explicit deletion or
//! when their time-to-live elapses.

pub mod channel;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod multiplexer;

/// Caller-chosen session identifier.
pub type SessionId = String;

pub use channel::{Channel, ChannelSettings, WriterLease, DEFAULT_LINGER};
pub use error::RelayError;
pub use lifecycle::Session;
pub use manager::{RegistrySettings, SessionRegistry, DEFAULT_TTL};
pub use multiplexer::{
    ConnectionId, Delivery, ReaderEvent, ReaderSubscription, DEFAULT_READER_QUEUE_CAPACITY,
};
