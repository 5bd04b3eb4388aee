//! Dialing the hub.
//!
//! The client only needs something that is both a stream and a sink of
//! WebSocket messages; [`TungsteniteDialer`] produces real sockets and
//! tests substitute in-memory ones.

use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tokio_tungstenite::tungstenite::Error as WsError;

use cksync_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::PeerError;

/// A bidirectional WebSocket message channel.
pub trait WsTransport:
    Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Send
{
}

impl<T> WsTransport for T where
    T: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Send
{
}

pub type BoxedTransport = Pin<Box<dyn WsTransport>>;

/// A boxed future returned by [`Dialer::dial`].
pub type DialFuture<'a> =
    Pin<Box<dyn Future<Output = Result<BoxedTransport, PeerError>> + Send + 'a>>;

/// Opens connections to the hub.
pub trait Dialer: Send + Sync + 'static {
    fn dial<'a>(&'a self, url: &'a str) -> DialFuture<'a>;
}

/// Dials with `tokio-tungstenite`, sized for large image frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteDialer;

impl Dialer for TungsteniteDialer {
    fn dial<'a>(&'a self, url: &'a str) -> DialFuture<'a> {
        Box::pin(async move {
            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
            Ok(Box::pin(ws_stream) as BoxedTransport)
        })
    }
}
