//! WebSocket admission adapter.
//!
//! Maps an inbound streaming connection tagged with
//! `(session_id, stream kind, role)` onto channel operations:
//!
//! - **Writers**: every inbound text frame is published to the channel until
//!   the socket closes or the channel closes the writer.
//! - **Readers**: every queued delivery is forwarded as a text frame; the
//!   end-of-stream marker becomes a normal close frame.
//!
//! Each connection detaches from its channel exactly once, after its loop
//! ends, whatever the cause.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use protocol::{CloseReason, StreamKind, END_OF_STREAM};

use crate::router::AppState;
use crate::session::{Channel, Delivery, ReaderEvent, RelayError, SessionRegistry};

/// `GET /logs/{session_id}/write/{kind}`
pub async fn write_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((session_id, kind)): Path<(String, StreamKind)>,
) -> Response {
    ws.on_upgrade(move |socket| run_writer(socket, state.registry, session_id, kind))
}

/// `GET /logs/{session_id}/read/{kind}`
pub async fn read_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((session_id, kind)): Path<(String, StreamKind)>,
) -> Response {
    ws.on_upgrade(move |socket| run_reader(socket, state.registry, session_id, kind))
}

/// Builds a close frame for `reason`.
fn close_message(reason: CloseReason, text: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: text.to_string().into(),
    }))
}

/// Resolves the channel a connection targets.
fn resolve_channel(
    registry: &SessionRegistry,
    session_id: &str,
    kind: StreamKind,
) -> Result<Channel, RelayError> {
    registry
        .lookup(session_id)
        .map(|session| session.channel(kind).clone())
}

async fn reject(mut socket: WebSocket, session_id: &str, kind: StreamKind, err: RelayError) {
    let reason = err.close_reason();
    tracing::debug!(
        session_id = %session_id,
        kind = %kind,
        code = reason.code(),
        "Rejecting stream connection: {}",
        err
    );
    let _ = socket
        .send(close_message(reason, reason.description()))
        .await;
}

/// Drives a writer connection.
pub async fn run_writer(
    mut socket: WebSocket,
    registry: Arc<SessionRegistry>,
    session_id: String,
    kind: StreamKind,
) {
    let channel = match resolve_channel(&registry, &session_id, kind) {
        Ok(channel) => channel,
        Err(err) => return reject(socket, &session_id, kind, err).await,
    };
    drop(registry);

    let mut lease = match channel.attach_writer().await {
        Ok(lease) => lease,
        Err(err) => return reject(socket, &session_id, kind, err).await,
    };
    let writer_id = lease.id();
    tracing::info!(session_id = %session_id, kind = %kind, "Writer connected");

    let close = loop {
        tokio::select! {
            biased;
            reason = lease.closed() => break reason,
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, kind = %kind, "Writer socket error: {}", e);
                        break None;
                    }
                };
                match channel.publish(writer_id, text).await {
                    Ok(_) => {}
                    // The channel closed between frames; the session is gone.
                    Err(RelayError::SessionNotFound(_)) => break Some(CloseReason::SessionDeleted),
                    Err(err) => break Some(err.close_reason()),
                }
            }
        }
    };

    channel.detach_writer(writer_id).await;
    tracing::info!(session_id = %session_id, kind = %kind, "Writer disconnected");

    if let Some(reason) = close {
        let _ = socket
            .send(close_message(reason, reason.description()))
            .await;
    }
}

/// Drives a reader connection.
pub async fn run_reader(
    socket: WebSocket,
    registry: Arc<SessionRegistry>,
    session_id: String,
    kind: StreamKind,
) {
    let channel = match resolve_channel(&registry, &session_id, kind) {
        Ok(channel) => channel,
        Err(err) => return reject(socket, &session_id, kind, err).await,
    };
    drop(registry);

    let mut subscription = match channel.attach_reader().await {
        Ok(subscription) => subscription,
        Err(err) => return reject(socket, &session_id, kind, err).await,
    };
    let reader_id = subscription.id();
    tracing::debug!(session_id = %session_id, kind = %kind, reader_id = %reader_id, "Reader connected");

    let (mut sink, mut stream) = socket.split();

    let close = loop {
        tokio::select! {
            event = subscription.recv() => match event {
                ReaderEvent::Item(Delivery::Data(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break None;
                    }
                }
                ReaderEvent::Item(Delivery::EndOfStream) => {
                    break Some((CloseReason::NormalClosure, END_OF_STREAM));
                }
                ReaderEvent::Closed(reason) => break Some((reason, reason.description())),
                ReaderEvent::Detached => {
                    break Some((CloseReason::NormalClosure, CloseReason::NormalClosure.description()));
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break None,
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session_id, kind = %kind, reader_id = %reader_id, "Reader socket error: {}", e);
                    break None;
                }
                // Readers have nothing to say; ignore anything else.
                Some(Ok(_)) => {}
            },
        }
    };

    channel.detach_reader(reader_id).await;
    tracing::debug!(session_id = %session_id, kind = %kind, reader_id = %reader_id, "Reader disconnected");

    if let Some((reason, text)) = close {
        let _ = sink.send(close_message(reason, text)).await;
    }
}
