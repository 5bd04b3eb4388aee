//! WebSocket hub for the pipeline side of the sync channel.
//!
//! Accepts any number of canvas peers, tracks them by session id,
//! keeps the registry of documents they expose, and publishes image
//! frames to them through a single ordered send queue.

mod connection;
mod documents;
mod exchange;
mod handler;
mod hub;
mod publisher;
mod registry;
mod server;
mod types;

pub use connection::{SendError, Sender, SessionMeta};
pub use documents::{DocumentEntry, DocumentRegistry, combo_key};
pub use exchange::TempExchange;
pub use handler::{Handler, HandlerFuture};
pub use hub::Hub;
pub use publisher::{Attachment, Outbound, PublishQueue, Publisher, publish_loop};
pub use registry::{ConnectionRegistry, Registration, Target};
pub use server::HubServer;
pub use types::{HubConfig, HubEvent};

/// Per-session send buffer capacity (frames, not bytes).
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("frame error: {0}")]
    Frame(#[from] cksync_protocol::FrameError),

    #[error("image error: {0}")]
    Image(#[from] cksync_imaging::ImageError),

    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("session {0} is not connected")]
    SessionGone(String),

    #[error("no reply for {0} within the request timeout")]
    Timeout(String),

    #[error("peer could not provide layer {layer} of document {document_id}")]
    LayerUnavailable { document_id: String, layer: String },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("send queue closed")]
    QueueClosed,

    #[error("server already running")]
    AlreadyRunning,
}
