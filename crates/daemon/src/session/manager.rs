//! Session registry.
//!
//! This module provides a thread-safe map from session identifier to live
//! [`Session`], with one expiry timer per session.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::{CloseReason, SessionInfo};
use uuid::Uuid;

use super::channel::ChannelSettings;
use super::error::RelayError;
use super::lifecycle::Session;
use super::SessionId;

/// Default session time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Settings applied to every session created by a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Lifetime of a session, measured from creation.
    pub ttl: Duration,
    pub channel: ChannelSettings,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            channel: ChannelSettings::default(),
        }
    }
}

/// Thread-safe session registry backed by DashMap.
///
/// The registry is shared as `Arc<SessionRegistry>`; expiry timers hold only a
/// weak reference so dropping the last handle stops them from firing.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    settings: RegistrySettings,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            sessions: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Creates a session and arms its expiry timer.
    ///
    /// Fails with [`RelayError::AlreadyExists`] while a session with the same
    /// id is live. Must be called from within a Tokio runtime.
    pub fn create(self: &Arc<Self>, id: &str) -> Result<Arc<Session>, RelayError> {
        validate_session_id(id)?;

        let session = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(RelayError::AlreadyExists(id.to_string())),
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(
                    id.to_string(),
                    self.settings.ttl,
                    self.settings.channel,
                ));
                slot.insert(Arc::clone(&session));
                session
            }
        };

        self.arm_expiry(&session);
        tracing::info!(
            session_id = %id,
            ttl_secs = self.settings.ttl.as_secs(),
            "Session created"
        );
        Ok(session)
    }

    fn arm_expiry(self: &Arc<Self>, session: &Session) {
        let registry = Arc::downgrade(self);
        let token = session.expiry_token().clone();
        let id = session.id().clone();
        let generation = session.generation();
        let ttl = session.ttl();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(ttl) => {
                    if let Some(registry) = registry.upgrade() {
                        registry.expire(&id, generation).await;
                    }
                }
            }
        });
    }

    /// Returns the live session for `id`.
    pub fn lookup(&self, id: &str) -> Result<Arc<Session>, RelayError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RelayError::NotFound(id.to_string()))
    }

    /// Returns whether a session with this id is live.
    pub fn exists(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Removes a session and closes every attached connection.
    ///
    /// The mapping is removed before the channels close, so no attach can
    /// succeed on a deleted session.
    pub async fn delete(&self, id: &str) -> Result<(), RelayError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| RelayError::NotFound(id.to_string()))?;
        session.close(CloseReason::SessionDeleted).await;
        tracing::info!(session_id = %id, "Session deleted");
        Ok(())
    }

    /// Expiry path: removes `id` only if it is still the incarnation the timer
    /// was armed for. Returns whether a session was removed.
    pub(crate) async fn expire(&self, id: &str, generation: Uuid) -> bool {
        match self
            .sessions
            .remove_if(id, |_, session| session.generation() == generation)
        {
            Some((_, session)) => {
                session.close(CloseReason::SessionDeleted).await;
                tracing::info!(session_id = %id, "Session expired");
                true
            }
            None => {
                tracing::debug!(session_id = %id, "Expiry fired for a session already gone");
                false
            }
        }
    }

    /// Snapshots of all live sessions, ordered by id.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Deletes every live session.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let total = ids.len();
        for id in ids {
            // Concurrent deletes are fine; NotFound just means someone beat us.
            let _ = self.delete(&id).await;
        }
        if total > 0 {
            tracing::info!(count = total, "Closed all sessions");
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistrySettings::default())
    }
}

/// Session ids travel as a single URL path segment.
fn validate_session_id(id: &str) -> Result<(), RelayError> {
    if id.is_empty() || id.contains('/') || id.chars().any(char::is_control) {
        return Err(RelayError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}
