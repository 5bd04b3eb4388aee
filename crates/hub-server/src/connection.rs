//! Session connection management: read/write pumps, ping/pong, send buffering.

use std::sync::Arc;

use cksync_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};
use cksync_protocol::{Frame, Payload};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Metadata about a connected peer.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub session_id: String,
    pub client_type: String,
    pub remote_addr: String,
}

/// Handle for sending frames to one session.
///
/// Cloneable and cheap; wraps an `mpsc::Sender` and the session's
/// cancellation token.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
    cancel: CancellationToken,
}

impl Sender {
    /// Creates a sender and the receiving end drained by the write pump.
    pub fn channel(cancel: CancellationToken) -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        (Self { tx, cancel }, rx)
    }

    /// Queues an already-built WebSocket message.
    ///
    /// Returns `Err` if the buffer is full or the session is closed.
    pub fn send_message(&self, msg: WsMessage) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError);
        }
        self.tx.try_send(msg).map_err(|_| SendError)
    }

    /// Queues a message, waiting for buffer space if needed.
    ///
    /// Returns `Err` if the session closes before the message is queued.
    pub async fn deliver(&self, msg: WsMessage) -> Result<(), SendError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SendError),
            sent = self.tx.send(msg) => sent.map_err(|_| SendError),
        }
    }

    /// Returns `true` while the session is open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed() && !self.cancel.is_cancelled()
    }

    /// Closes the session: the write pump sends a close frame and both
    /// pumps stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Error returned when the send buffer is full or the session closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Runs the read and write pumps for one session until it closes.
///
/// The write pump runs as a background task draining `rx`; the read
/// pump runs on the caller's task and dispatches decoded frames to the
/// handler. Returns once the read side ends or the sender is closed.
pub(crate) async fn run_session<S, H>(
    ws_stream: S,
    meta: &SessionMeta,
    handler: Arc<H>,
    sender: Sender,
    rx: mpsc::Receiver<WsMessage>,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (ws_sink, ws_stream) = ws_stream.split();
    let cancel = sender.cancel.clone();

    let write = tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    read_pump(ws_stream, meta, &sender, &handler, cancel.clone()).await;

    // When the read pump exits, stop the write pump too.
    cancel.cancel();
    let _ = write.await;
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.reset();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches them to the handler.
async fn read_pump<S, H>(
    mut stream: S,
    meta: &SessionMeta,
    sender: &Sender,
    handler: &Arc<H>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let session = meta.session_id.as_str();
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                tracing::warn!(%session, "no traffic within pong wait, closing session");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                        match ws_msg {
                            WsMessage::Binary(data) => {
                                if data.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!(
                                        %session,
                                        len = data.len(),
                                        max = WS_MAX_MESSAGE_SIZE,
                                        "binary message exceeds max size"
                                    );
                                    continue;
                                }
                                dispatch_binary(handler, session, &data).await;
                            }
                            WsMessage::Text(text) => {
                                tracing::warn!(
                                    %session,
                                    len = text.len(),
                                    "ignoring text message, frames are binary only"
                                );
                            }
                            WsMessage::Ping(data) => {
                                let _ = sender.send_message(WsMessage::Pong(data));
                            }
                            WsMessage::Pong(_) => {}
                            WsMessage::Close(_) => {
                                tracing::info!(%session, "received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {} // Raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(%session, "read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

/// Decodes a binary message and dispatches it by payload type.
///
/// Malformed frames are logged and dropped; the session stays open.
pub(crate) async fn dispatch_binary<H: Handler>(handler: &Arc<H>, session: &str, data: &[u8]) {
    let frame = match Frame::decode(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(%session, "dropping frame: {e}");
            return;
        }
    };

    tracing::debug!(
        %session,
        msg_type = %frame.payload.message_type(),
        attachments = frame.attachments.len(),
        "received frame"
    );

    let session = session.to_string();
    let Frame {
        payload,
        attachments,
    } = frame;
    match payload {
        Payload::SendImage(p) => handler.on_send_image(session, p, attachments).await,
        Payload::GetImage(p) => handler.on_get_image(session, p, attachments).await,
        Payload::DocumentSync(p) => handler.on_document_sync(session, p).await,
    }
}
