//! WebSocket read pump: hands binary frames to the dispatcher.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use cksync_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

/// Reads messages from the WebSocket until the connection ends.
///
/// Every binary message is passed to `on_binary`. If nothing at all
/// arrives within [`WS_PONG_WAIT`] the connection is considered dead and
/// the pump returns, which the caller treats like a read error.
pub(crate) async fn read_pump<S, F>(
    mut read: S,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    mut on_binary: F,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    F: FnMut(&[u8]),
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("no traffic from hub within pong wait, closing");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Binary(data) => {
                                if data.len() > WS_MAX_MESSAGE_SIZE {
                                    warn!("message too large ({} bytes), dropping", data.len());
                                    continue;
                                }
                                on_binary(&data);
                            }
                            tungstenite::Message::Text(text) => {
                                warn!(len = text.len(), "ignoring text message from hub");
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            tungstenite::Message::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }
}
