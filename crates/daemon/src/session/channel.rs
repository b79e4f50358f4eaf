//! Single-writer, multi-reader relay unit.
//!
//! A [`Channel`] is one output stream (stdout or stderr) of a session. It
//! admits at most one writer at a time and fans every published message out
//! to the private queue of each attached reader.
//!
//! The writer slot cycles through `Idle -> WriterActive -> Draining -> Idle`.
//! When the writer detaches, every attached reader receives the end-of-stream
//! marker and the channel lingers for a short window so readers that connect
//! just after the writer finished still see the marker. When the linger
//! window elapses the remaining readers are closed normally.
//!
//! All state lives behind one `tokio::sync::Mutex`; no operation awaits while
//! holding it except for acquiring it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use protocol::{ChannelInfo, ChannelState, CloseReason, StreamKind};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::RelayError;
use super::multiplexer::{
    ConnectionId, Delivery, DeliveryOutcome, ReaderHandle, ReaderSubscription,
    DEFAULT_READER_QUEUE_CAPACITY,
};

/// Default linger window after a writer detaches.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(5);

/// Tunables shared by every channel of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// How long a drained channel keeps readers before closing them.
    pub linger: Duration,
    /// Capacity of each reader's private queue.
    pub reader_queue_capacity: usize,
    /// Park readers on a channel that has never had a writer instead of
    /// sending them the end-of-stream marker.
    pub readers_wait_for_writer: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            linger: DEFAULT_LINGER,
            reader_queue_capacity: DEFAULT_READER_QUEUE_CAPACITY,
            readers_wait_for_writer: true,
        }
    }
}

/// Writer registration returned by [`Channel::attach_writer`].
#[derive(Debug)]
pub struct WriterLease {
    id: ConnectionId,
    closed: oneshot::Receiver<CloseReason>,
}

impl WriterLease {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Resolves when the channel forcibly closes this writer.
    ///
    /// Returns `None` once the writer slot was released without a close
    /// reason. Cancel-safe, but must not be polled again after it resolves.
    pub async fn closed(&mut self) -> Option<CloseReason> {
        (&mut self.closed).await.ok()
    }
}

#[derive(Debug)]
struct WriterSlot {
    id: ConnectionId,
    close_tx: oneshot::Sender<CloseReason>,
}

#[derive(Debug)]
struct ChannelInner {
    state: ChannelState,
    writer: Option<WriterSlot>,
    readers: HashMap<ConnectionId, ReaderHandle>,
    linger: Option<CancellationToken>,
    /// Incremented each time a writer attaches.
    cycle: u64,
    cycles_completed: u64,
    messages_published: u64,
}

impl ChannelInner {
    /// Closes and forgets every attached reader.
    fn close_readers(&mut self, reason: CloseReason) {
        for (_, reader) in self.readers.drain() {
            reader.close(reason);
        }
    }

    /// Pushes `item` to every reader, closing those whose queue is full.
    ///
    /// Returns the number of readers that accepted the item.
    fn fan_out(&mut self, kind: StreamKind, item: &Delivery) -> usize {
        let mut delivered = 0;
        let mut overflowed = Vec::new();
        let mut gone = Vec::new();

        for (id, reader) in self.readers.iter_mut() {
            match reader.try_deliver(item.clone()) {
                DeliveryOutcome::Queued => delivered += 1,
                DeliveryOutcome::Overflow => overflowed.push(*id),
                DeliveryOutcome::Gone => gone.push(*id),
            }
        }

        for id in overflowed {
            if let Some(reader) = self.readers.remove(&id) {
                tracing::warn!(
                    kind = %kind,
                    reader_id = %id,
                    delivered = reader.delivered(),
                    "Reader queue full, closing reader"
                );
                reader.close(CloseReason::BufferOverflow);
            }
        }
        for id in gone {
            self.readers.remove(&id);
        }

        delivered
    }

    /// Ends the current cycle: Draining -> Idle.
    fn finish_cycle(&mut self) {
        if let Some(token) = self.linger.take() {
            token.cancel();
        }
        self.close_readers(CloseReason::NormalClosure);
        self.state = ChannelState::Idle;
        self.cycles_completed += 1;
    }
}

/// One relayed stream of a session.
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct Channel {
    kind: StreamKind,
    settings: ChannelSettings,
    inner: Arc<Mutex<ChannelInner>>,
}

impl Channel {
    /// Creates an idle channel.
    pub fn new(kind: StreamKind, settings: ChannelSettings) -> Self {
        Self {
            kind,
            settings,
            inner: Arc::new(Mutex::new(ChannelInner {
                state: ChannelState::Idle,
                writer: None,
                readers: HashMap::new(),
                linger: None,
                cycle: 0,
                cycles_completed: 0,
                messages_published: 0,
            })),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Current writer-slot state.
    pub async fn state(&self) -> ChannelState {
        self.inner.lock().await.state
    }

    /// Number of readers currently attached.
    pub async fn reader_count(&self) -> usize {
        self.inner.lock().await.readers.len()
    }

    /// Claims the writer slot.
    ///
    /// Attaching while the previous cycle is still draining ends that cycle
    /// first: its linger timer is cancelled and its readers are closed
    /// normally.
    pub async fn attach_writer(&self) -> Result<WriterLease, RelayError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            ChannelState::Closed => return Err(RelayError::SessionNotFound(self.kind)),
            ChannelState::WriterActive => return Err(RelayError::WriterConflict(self.kind)),
            ChannelState::Draining => {
                tracing::debug!(kind = %self.kind, "Writer reattached during linger, ending previous cycle");
                inner.finish_cycle();
            }
            ChannelState::Idle => {}
        }

        let id = Uuid::new_v4();
        let (close_tx, closed) = oneshot::channel();
        inner.writer = Some(WriterSlot { id, close_tx });
        inner.state = ChannelState::WriterActive;
        inner.cycle += 1;

        tracing::debug!(
            kind = %self.kind,
            writer_id = %id,
            readers = inner.readers.len(),
            "Writer attached"
        );
        Ok(WriterLease { id, closed })
    }

    /// Releases the writer slot and starts draining.
    ///
    /// Every attached reader gets the end-of-stream marker immediately; the
    /// linger timer then closes whoever is left. A stale `writer_id` is a
    /// no-op.
    pub async fn detach_writer(&self, writer_id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        let is_current = inner.writer.as_ref().is_some_and(|w| w.id == writer_id);
        if !is_current || inner.state != ChannelState::WriterActive {
            return;
        }

        inner.writer = None;
        inner.state = ChannelState::Draining;
        let notified = inner.fan_out(self.kind, &Delivery::EndOfStream);

        let token = CancellationToken::new();
        inner.linger = Some(token.clone());
        let cycle = inner.cycle;
        drop(inner);

        tracing::debug!(
            kind = %self.kind,
            writer_id = %writer_id,
            readers = notified,
            linger = ?self.settings.linger,
            "Writer detached, draining"
        );

        let channel = self.clone();
        let linger = self.settings.linger;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(linger) => channel.finish_drain(cycle).await,
            }
        });
    }

    /// Linger expiry for `cycle`.
    async fn finish_drain(&self, cycle: u64) {
        let mut inner = self.inner.lock().await;
        if inner.state == ChannelState::Draining && inner.cycle == cycle {
            let remaining = inner.readers.len();
            inner.finish_cycle();
            tracing::debug!(kind = %self.kind, closed = remaining, "Linger elapsed, channel idle");
        }
    }

    /// Fans `message` out to every attached reader.
    ///
    /// Returns the number of readers that received it. Readers whose queue
    /// is full are closed with [`CloseReason::BufferOverflow`].
    pub async fn publish(
        &self,
        writer_id: ConnectionId,
        message: impl Into<String>,
    ) -> Result<usize, RelayError> {
        let mut inner = self.inner.lock().await;
        if inner.state == ChannelState::Closed {
            return Err(RelayError::SessionNotFound(self.kind));
        }
        let is_current = inner.writer.as_ref().is_some_and(|w| w.id == writer_id);
        if !is_current {
            return Err(RelayError::NotWriter(self.kind));
        }

        inner.messages_published += 1;
        Ok(inner.fan_out(self.kind, &Delivery::Data(message.into())))
    }

    /// Registers a reader.
    ///
    /// While a writer is active or the channel is draining the reader joins
    /// the active set (a draining channel hands it the end-of-stream marker
    /// right away). On an idle channel whose previous cycle has finished the
    /// reader only receives the end-of-stream marker and is not registered.
    /// A channel that never had a writer parks the reader until one arrives
    /// when `readers_wait_for_writer` is set.
    pub async fn attach_reader(&self) -> Result<ReaderSubscription, RelayError> {
        let mut inner = self.inner.lock().await;
        let (mut handle, subscription) = ReaderHandle::new(self.settings.reader_queue_capacity);
        let id = handle.id();

        match inner.state {
            ChannelState::Closed => return Err(RelayError::SessionNotFound(self.kind)),
            ChannelState::WriterActive => {
                inner.readers.insert(id, handle);
                tracing::debug!(kind = %self.kind, reader_id = %id, "Reader attached");
            }
            ChannelState::Draining => {
                handle.try_deliver(Delivery::EndOfStream);
                inner.readers.insert(id, handle);
                tracing::debug!(kind = %self.kind, reader_id = %id, "Reader attached during linger");
            }
            ChannelState::Idle => {
                if inner.cycles_completed == 0 && self.settings.readers_wait_for_writer {
                    inner.readers.insert(id, handle);
                    tracing::debug!(kind = %self.kind, reader_id = %id, "Reader waiting for writer");
                } else {
                    handle.try_deliver(Delivery::EndOfStream);
                    tracing::debug!(kind = %self.kind, reader_id = %id, "Late reader, stream already ended");
                }
            }
        }

        Ok(subscription)
    }

    /// Removes a reader from the active set. Unknown ids are ignored.
    pub async fn detach_reader(&self, reader_id: ConnectionId) -> bool {
        let removed = self.inner.lock().await.readers.remove(&reader_id).is_some();
        if removed {
            tracing::debug!(kind = %self.kind, reader_id = %reader_id, "Reader detached");
        }
        removed
    }

    /// Tears the channel down, closing the writer and every reader.
    ///
    /// The channel stays `Closed`; every later attach fails.
    pub async fn close(&self, reason: CloseReason) {
        let mut inner = self.inner.lock().await;
        if inner.state == ChannelState::Closed {
            return;
        }
        if let Some(token) = inner.linger.take() {
            token.cancel();
        }
        if let Some(writer) = inner.writer.take() {
            let _ = writer.close_tx.send(reason);
        }
        inner.close_readers(reason);
        inner.state = ChannelState::Closed;
    }

    /// Snapshot for the admin API.
    pub async fn info(&self) -> ChannelInfo {
        let inner = self.inner.lock().await;
        ChannelInfo {
            kind: self.kind,
            state: inner.state,
            writer_attached: inner.writer.is_some(),
            readers: inner.readers.len(),
            cycles_completed: inner.cycles_completed,
            messages_published: inner.messages_published,
        }
    }
}
