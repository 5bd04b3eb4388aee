//! Public types for the peer client.

use std::fmt;
use std::time::Duration;

use cksync_protocol::constants::{QUERY_CLIENT_ID, QUERY_CLIENT_TYPE, RECONNECT_DELAY, WS_ROUTE};

use crate::index::ImageMeta;

/// Connection state of the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Dialing, or waiting to redial after a lost connection.
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Single-character status shown next to the connect button.
    pub fn indicator(self) -> char {
        match self {
            ConnectionState::Disconnected => 'D',
            ConnectionState::Connecting => 'R',
            ConnectionState::Connected => 'C',
        }
    }

    /// Label for the connect button in this state.
    pub fn connect_label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Connect",
            ConnectionState::Connecting => "Cancel",
            ConnectionState::Connected => "Disconnect",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Events emitted by the peer client.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// Images from a `SendImage` frame were stored in the history index.
    ImageAdded {
        document_id: String,
        /// Run the images were filed under (the previous run when appending).
        run_id: String,
        images: Vec<ImageMeta>,
    },
    /// A document's history was replaced or cleared.
    DocumentChanged(String),
}

/// Peer client configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Hub address as typed by the user, e.g. `http://127.0.0.1:8188`.
    pub base_url: String,
    pub route: String,
    /// Sent as `clientType` in the connection URL.
    pub client_type: String,
    /// Fixed delay between connection attempts.
    pub retry_delay: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8188".into(),
            route: WS_ROUTE.into(),
            client_type: "krita".into(),
            retry_delay: RECONNECT_DELAY,
        }
    }
}

impl PeerConfig {
    /// WebSocket URL for `session_id`.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`; a bare `host:port`
    /// is treated as `ws`.
    pub fn ws_url(&self, session_id: &str) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            format!("ws://{base}")
        };
        format!(
            "{base}/{}?{QUERY_CLIENT_ID}={session_id}&{QUERY_CLIENT_TYPE}={}",
            self.route.trim_matches('/'),
            self.client_type
        )
    }
}
