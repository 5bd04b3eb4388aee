//! Outbound side of a hub connection: queued frames plus keepalive pings.

use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Drains `outbound` into `sink`, pinging the hub every `ping_period`.
///
/// Stops when `cancel` fires, when every sender is dropped, or on the
/// first failed write. A close frame is attempted on the way out.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<WsMessage>,
    cancel: CancellationToken,
    ping_period: Duration,
) where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut keepalive = tokio::time::interval(ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.reset();

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            queued = outbound.recv() => match queued {
                Some(msg) => msg,
                None => break,
            },
            _ = keepalive.tick() => {
                trace!("pinging hub");
                WsMessage::Ping(Vec::new().into())
            }
        };

        if let Err(e) = sink.send(msg).await {
            warn!("write to hub failed: {e}");
            break;
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
}
