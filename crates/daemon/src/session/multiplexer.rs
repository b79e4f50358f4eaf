//! Per-reader delivery queues.
//!
//! Every reader attached to a channel owns a private bounded queue. The
//! channel pushes into it with `try_send` so a slow reader can never stall the
//! writer or any other reader; when a queue is full the channel closes that
//! reader instead of dropping messages, which keeps delivery exactly-once for
//! every reader that stays attached.

use protocol::CloseReason;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Identity of a streaming connection attached to a channel.
pub type ConnectionId = Uuid;

/// Default per-reader queue capacity.
pub const DEFAULT_READER_QUEUE_CAPACITY: usize = 1024;

/// An item queued for a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A message published by the writer.
    Data(String),
    /// The writer of the current cycle has finished.
    EndOfStream,
}

/// Result of pushing an item into a reader's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Queued,
    /// The queue is full; the reader must be closed.
    Overflow,
    /// The reader side is gone.
    Gone,
}

/// Channel-side half of a reader registration.
#[derive(Debug)]
pub struct ReaderHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Delivery>,
    close_tx: Option<oneshot::Sender<CloseReason>>,
    delivered: u64,
}

impl ReaderHandle {
    /// Creates a handle and the matching subscription.
    pub fn new(capacity: usize) -> (Self, ReaderSubscription) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let handle = ReaderHandle {
            id,
            tx,
            close_tx: Some(close_tx),
            delivered: 0,
        };
        let subscription = ReaderSubscription {
            id,
            rx,
            close_rx,
            close_seen: false,
            pending_close: None,
        };
        (handle, subscription)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Number of items accepted into the queue.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Pushes an item without waiting.
    pub fn try_deliver(&mut self, item: Delivery) -> DeliveryOutcome {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.delivered += 1;
                DeliveryOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => DeliveryOutcome::Overflow,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(reader_id = %self.id, "Reader queue closed");
                DeliveryOutcome::Gone
            }
        }
    }

    /// Instructs the reader's connection to close.
    ///
    /// Consumes the handle; the reader still drains already queued items
    /// first when the reason is [`CloseReason::NormalClosure`].
    pub fn close(mut self, reason: CloseReason) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(reason);
        }
    }
}

/// What a reader connection should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Forward this item to the transport.
    Item(Delivery),
    /// The channel closed this reader.
    Closed(CloseReason),
    /// The channel released the reader without a close reason and the queue is empty.
    Detached,
}

/// Connection-side half of a reader registration.
#[derive(Debug)]
pub struct ReaderSubscription {
    id: ConnectionId,
    rx: mpsc::Receiver<Delivery>,
    close_rx: oneshot::Receiver<CloseReason>,
    close_seen: bool,
    pending_close: Option<CloseReason>,
}

impl ReaderSubscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Waits for the next event.
    ///
    /// Cancel-safe; suitable for use in `tokio::select!`.
    pub async fn recv(&mut self) -> ReaderEvent {
        loop {
            if let Some(reason) = self.pending_close {
                if reason.is_normal() {
                    if let Ok(item) = self.rx.try_recv() {
                        return ReaderEvent::Item(item);
                    }
                }
                return ReaderEvent::Closed(reason);
            }

            tokio::select! {
                biased;
                res = &mut self.close_rx, if !self.close_seen => {
                    self.close_seen = true;
                    if let Ok(reason) = res {
                        self.pending_close = Some(reason);
                    }
                }
                item = self.rx.recv() => {
                    return match item {
                        Some(item) => ReaderEvent::Item(item),
                        None => ReaderEvent::Detached,
                    };
                }
            }
        }
    }

    /// Returns the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<ReaderEvent> {
        if !self.close_seen {
            match self.close_rx.try_recv() {
                Ok(reason) => {
                    self.close_seen = true;
                    self.pending_close = Some(reason);
                }
                Err(oneshot::error::TryRecvError::Closed) => self.close_seen = true,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        if let Some(reason) = self.pending_close {
            if reason.is_normal() {
                if let Ok(item) = self.rx.try_recv() {
                    return Some(ReaderEvent::Item(item));
                }
            }
            return Some(ReaderEvent::Closed(reason));
        }
        match self.rx.try_recv() {
            Ok(item) => Some(ReaderEvent::Item(item)),
            Err(mpsc::error::TryRecvError::Disconnected) => Some(ReaderEvent::Detached),
            Err(mpsc::error::TryRecvError::Empty) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Delivery {
        Delivery::Data(s.to_string())
    }

    #[tokio::test]
    async fn test_items_arrive_in_order() {
        let (mut handle, mut sub) = ReaderHandle::new(8);
        assert_eq!(handle.id(), sub.id());

        for s in ["m1", "m2", "m3"] {
            assert_eq!(handle.try_deliver(data(s)), DeliveryOutcome::Queued);
        }
        assert_eq!(handle.try_deliver(Delivery::EndOfStream), DeliveryOutcome::Queued);
        assert_eq!(handle.delivered(), 4);

        assert_eq!(sub.recv().await, ReaderEvent::Item(data("m1")));
        assert_eq!(sub.recv().await, ReaderEvent::Item(data("m2")));
        assert_eq!(sub.recv().await, ReaderEvent::Item(data("m3")));
        assert_eq!(sub.recv().await, ReaderEvent::Item(Delivery::EndOfStream));
    }

    #[tokio::test]
    async fn test_full_queue_reports_overflow() {
        let (mut handle, _sub) = ReaderHandle::new(2);
        assert_eq!(handle.try_deliver(data("a")), DeliveryOutcome::Queued);
        assert_eq!(handle.try_deliver(data("b")), DeliveryOutcome::Queued);
        assert_eq!(handle.try_deliver(data("c")), DeliveryOutcome::Overflow);
        assert_eq!(handle.delivered(), 2);
    }

    #[tokio::test]
    async fn test_dropped_subscription_reports_gone() {
        let (mut handle, sub) = ReaderHandle::new(2);
        drop(sub);
        assert_eq!(handle.try_deliver(data("a")), DeliveryOutcome::Gone);
    }

    #[tokio::test]
    async fn test_abnormal_close_preempts_queue() {
        let (mut handle, mut sub) = ReaderHandle::new(4);
        handle.try_deliver(data("stale"));
        handle.close(CloseReason::BufferOverflow);

        assert_eq!(sub.recv().await, ReaderEvent::Closed(CloseReason::BufferOverflow));
        // Sticky once closed.
        assert_eq!(sub.recv().await, ReaderEvent::Closed(CloseReason::BufferOverflow));
    }

    #[tokio::test]
    async fn test_normal_close_drains_queue_first() {
        let (mut handle, mut sub) = ReaderHandle::new(4);
        handle.try_deliver(data("last"));
        handle.try_deliver(Delivery::EndOfStream);
        handle.close(CloseReason::NormalClosure);

        assert_eq!(sub.recv().await, ReaderEvent::Item(data("last")));
        assert_eq!(sub.recv().await, ReaderEvent::Item(Delivery::EndOfStream));
        assert_eq!(sub.recv().await, ReaderEvent::Closed(CloseReason::NormalClosure));
    }

    #[tokio::test]
    async fn test_dropped_handle_drains_then_detaches() {
        let (mut handle, mut sub) = ReaderHandle::new(4);
        handle.try_deliver(Delivery::EndOfStream);
        drop(handle);

        assert_eq!(sub.recv().await, ReaderEvent::Item(Delivery::EndOfStream));
        assert_eq!(sub.recv().await, ReaderEvent::Detached);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let (mut handle, mut sub) = ReaderHandle::new(4);
        assert_eq!(sub.try_recv(), None);

        handle.try_deliver(data("x"));
        assert_eq!(sub.try_recv(), Some(ReaderEvent::Item(data("x"))));

        handle.close(CloseReason::SessionDeleted);
        assert_eq!(
            sub.try_recv(),
            Some(ReaderEvent::Closed(CloseReason::SessionDeleted))
        );
    }

    #[tokio::test]
    async fn test_recv_waits_for_item() {
        let (mut handle, mut sub) = ReaderHandle::new(4);
        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        handle.try_deliver(data("late"));
        assert_eq!(waiter.await.unwrap(), ReaderEvent::Item(data("late")));
    }
}
