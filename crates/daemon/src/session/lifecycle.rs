//! A live logging session: two channels plus a bounded lifetime.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use protocol::{CloseReason, SessionInfo, StreamKind};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::channel::{Channel, ChannelSettings};
use super::SessionId;

/// A registered session.
///
/// Owns its stdout and stderr channels exclusively; both are torn down
/// together by [`Session::close`].
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    /// Distinguishes incarnations of a reused identifier.
    generation: Uuid,
    created_at: SystemTime,
    ttl: Duration,
    stdout: Channel,
    stderr: Channel,
    expiry: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: SessionId, ttl: Duration, settings: ChannelSettings) -> Self {
        Self {
            id,
            generation: Uuid::new_v4(),
            created_at: SystemTime::now(),
            ttl,
            stdout: Channel::new(StreamKind::Stdout, settings),
            stderr: Channel::new(StreamKind::Stderr, settings),
            expiry: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn generation(&self) -> Uuid {
        self.generation
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Absolute deadline; activity does not extend it.
    ///
    /// `None` when the deadline lies beyond what `SystemTime` can represent.
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.created_at.checked_add(self.ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the channel for `kind`.
    pub fn channel(&self, kind: StreamKind) -> &Channel {
        match kind {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    /// Token cancelled when the session is torn down; stops the expiry timer.
    pub(crate) fn expiry_token(&self) -> &CancellationToken {
        &self.expiry
    }

    /// Closes both channels and every attached connection with `reason`.
    pub async fn close(&self, reason: CloseReason) {
        self.expiry.cancel();
        for kind in StreamKind::ALL {
            self.channel(kind).close(reason).await;
        }
    }

    /// Snapshot for the admin API.
    pub async fn info(&self) -> SessionInfo {
        let mut channels = Vec::with_capacity(StreamKind::ALL.len());
        for kind in StreamKind::ALL {
            channels.push(self.channel(kind).info().await);
        }
        SessionInfo {
            session_id: self.id.clone(),
            created_at: unix_secs(self.created_at),
            expires_at: unix_secs(self.created_at).saturating_add(self.ttl.as_secs()),
            channels,
        }
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
