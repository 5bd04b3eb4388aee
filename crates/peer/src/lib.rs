//! Canvas-side peer of the sync channel.
//!
//! Keeps a reconnecting WebSocket connection to the hub, files incoming
//! generated images into a per-document history, answers layer requests
//! from the host's document tree, and reports the open documents.

mod client;
mod dispatch;
mod history;
pub mod host;
pub mod index;
mod pumps;
pub mod transport;
pub mod types;

pub use client::PeerClient;
pub use history::preview_layer_path;
pub use host::{DocumentHost, HostError, LayerHandle};
pub use index::{ImageIndex, ImageMeta, StoredImage};
pub use transport::{BoxedTransport, DialFuture, Dialer, TungsteniteDialer, WsTransport};
pub use types::{ConnectionState, PeerConfig, PeerEvent};

/// Per-connection outbound buffer capacity (frames, not bytes).
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the peer client.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("frame error: {0}")]
    Frame(#[from] cksync_protocol::FrameError),

    #[error("image error: {0}")]
    Image(#[from] cksync_imaging::ImageError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("not connected to hub")]
    NotConnected,

    #[error("no Tokio runtime to run the connection on")]
    NoRuntime,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("send buffer full")]
    SendBufferFull,

    #[error("unknown image {0}")]
    UnknownImage(uuid::Uuid),
}
