//! WebSocket endpoints of a session's channels.
//!
//! A [`StreamWriter`] is the single producer of one channel; any number of
//! [`StreamReader`]s consume it. The proxy ends every reader connection with a
//! close frame whose code is a [`CloseReason`].

use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use protocol::{CloseReason, Role, StreamKind, END_OF_STREAM};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::admin::AdminClient;
use crate::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for the proxy to acknowledge.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Item produced by [`StreamReader::recv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// One published message.
    Data(String),
    /// The connection is over. Terminal: later calls return it again.
    Closed {
        /// Reason sent by the proxy; `None` if the connection dropped
        /// without a recognised close code.
        reason: Option<CloseReason>,
        /// The writer finished and every published message was delivered.
        end_of_stream: bool,
    },
}

/// Decodes a received close frame.
fn close_reason(frame: Option<&CloseFrame<'_>>) -> (Option<CloseReason>, bool) {
    let Some(frame) = frame else {
        return (None, false);
    };
    let code = u16::from(frame.code);
    let reason = CloseReason::from_code(code).ok();
    let end_of_stream = reason == Some(CloseReason::NormalClosure) && frame.reason == END_OF_STREAM;
    (reason, end_of_stream)
}

async fn connect(url: &Url) -> Result<WsStream> {
    tracing::debug!("Connecting to {}", url);
    let (ws, _) = connect_async(url.as_str()).await?;
    Ok(ws)
}

/// Reading end of a channel.
pub struct StreamReader {
    ws: WsStream,
    kind: StreamKind,
    closed: Option<(Option<CloseReason>, bool)>,
}

impl StreamReader {
    /// Attaches a reader to the `kind` channel of `session_id`.
    ///
    /// Connecting to a session that does not exist succeeds; the first
    /// [`recv`](Self::recv) then reports [`CloseReason::SessionNotFound`].
    pub async fn connect(admin: &AdminClient, session_id: &str, kind: StreamKind) -> Result<Self> {
        let url = admin.stream_url(session_id, Role::Reader, kind);
        Ok(Self {
            ws: connect(&url).await?,
            kind,
            closed: None,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Waits for the next message or the end of the connection.
    pub async fn recv(&mut self) -> Result<ReadEvent> {
        loop {
            if let Some((reason, end_of_stream)) = self.closed {
                return Ok(ReadEvent::Closed {
                    reason,
                    end_of_stream,
                });
            }

            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(ReadEvent::Data(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(ReadEvent::Data(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    let (reason, end_of_stream) = close_reason(frame.as_ref());
                    tracing::debug!(
                        "{} reader closed: {:?} (end of stream: {})",
                        self.kind,
                        reason,
                        end_of_stream
                    );
                    self.closed = Some((reason, end_of_stream));
                }
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.closed = Some((None, false));
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Reads until the connection ends, returning every message and the
    /// terminal event.
    pub async fn collect(mut self) -> Result<(Vec<String>, ReadEvent)> {
        let mut lines = Vec::new();
        loop {
            match self.recv().await? {
                ReadEvent::Data(line) => lines.push(line),
                closed => return Ok((lines, closed)),
            }
        }
    }
}

/// Writing end of a channel.
pub struct StreamWriter {
    ws: WsStream,
    kind: StreamKind,
    closed: Option<Option<CloseReason>>,
}

impl StreamWriter {
    /// Attaches as the writer of the `kind` channel of `session_id`.
    ///
    /// The proxy admits the socket before checking the writer slot, so a
    /// rejected writer only learns about it through [`closed`](Self::closed)
    /// or a failing [`send`](Self::send).
    pub async fn connect(admin: &AdminClient, session_id: &str, kind: StreamKind) -> Result<Self> {
        let url = admin.stream_url(session_id, Role::Writer, kind);
        Ok(Self {
            ws: connect(&url).await?,
            kind,
            closed: None,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Publishes one message.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<()> {
        self.poll_closed();
        match self.closed {
            Some(Some(reason)) => return Err(ClientError::Closed(reason)),
            Some(None) => return Err(WsError::ConnectionClosed.into()),
            None => {}
        }
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Waits until the proxy closes this connection.
    pub async fn closed(&mut self) -> Option<CloseReason> {
        while self.closed.is_none() {
            match self.ws.next().await {
                Some(Ok(Message::Close(frame))) => {
                    self.closed = Some(close_reason(frame.as_ref()).0);
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => self.closed = Some(None),
            }
        }
        self.closed.flatten()
    }

    /// Detaches the writer, starting the channel's drain.
    ///
    /// Returns the reason the proxy closed the connection with, if it did so
    /// before this call.
    pub async fn close(mut self) -> Result<Option<CloseReason>> {
        self.poll_closed();
        if self.closed.is_none() {
            match self.ws.close(None).await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {}
                Err(e) => return Err(e.into()),
            }
            // Wait for the close handshake so the detach is visible on return
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
                while let Some(Ok(message)) = self.ws.next().await {
                    if matches!(message, Message::Close(_)) {
                        break;
                    }
                }
            })
            .await;
            return Ok(None);
        }
        Ok(self.closed.flatten())
    }

    /// Picks up a close frame that already arrived, without waiting.
    fn poll_closed(&mut self) {
        while self.closed.is_none() {
            match self.ws.next().now_or_never() {
                None => break,
                Some(Some(Ok(Message::Close(frame)))) => {
                    self.closed = Some(close_reason(frame.as_ref()).0);
                }
                Some(Some(Ok(_))) => {}
                Some(Some(Err(_)) | None) => self.closed = Some(None),
            }
        }
    }
}
