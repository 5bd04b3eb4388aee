//! Public configuration and event types for the hub.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use cksync_protocol::constants::{IMAGE_REQUEST_TIMEOUT, WS_ROUTE};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to listen on.
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Path segment peers connect to (without leading slash).
    pub route: String,
    /// Directory for the temp-file exchange. `None` disables it.
    pub temp_dir: Option<PathBuf>,
    /// How long a layer request may stay unanswered.
    pub request_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            route: WS_ROUTE.to_string(),
            temp_dir: None,
            request_timeout: IMAGE_REQUEST_TIMEOUT,
        }
    }
}

impl HubConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Notifications for the pipeline UI.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// A peer opened a session.
    SessionConnected {
        session_id: String,
        client_type: String,
    },
    /// A peer's session ended.
    SessionClosed { session_id: String },
    /// The document combo list changed.
    DocumentsChanged { combo: Vec<String> },
    /// A layer reply was written through the temp-file exchange.
    ImageSaved { prefix: String, path: PathBuf },
}
