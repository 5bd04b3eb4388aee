use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default WebSocket route served by the hub.
pub const WS_ROUTE: &str = "krita-sync-ws";

/// Query parameter carrying the session id.
pub const QUERY_CLIENT_ID: &str = "clientId";

/// Query parameter carrying the peer role (e.g. `krita`).
pub const QUERY_CLIENT_TYPE: &str = "clientType";

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline on the peer: if nothing arrives within this
/// window the connection is treated as dead and the peer reconnects.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings (must be well below [`WS_PONG_WAIT`]).
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum message size in bytes (1 GiB).
///
/// A single frame carries a batch of base64-encoded PNGs, so
/// multi-megapixel generations need a generous ceiling.
pub const WS_MAX_MESSAGE_SIZE: usize = 1 << 30;

/// Fixed delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long a layer request (socket or temp-file) may stay unanswered.
pub const IMAGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Combo entry shown when no peer has registered a document.
pub const MISSING_DOCUMENT: &str = "Missing Document";

/// Discriminant of a JSON payload (`type` field).
///
/// Serialized as the variant name. Older encoders wrote the integer
/// code instead, see [`MessageType::from_legacy_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    SendImage,
    GetImage,
    DocumentSync,
}

impl MessageType {
    /// Wire tag written into the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::SendImage => "SendImage",
            MessageType::GetImage => "GetImage",
            MessageType::DocumentSync => "DocumentSync",
        }
    }

    /// Parses a string tag. Also accepts the older `*Krita` spellings.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SendImage" | "SendImageKrita" => Some(MessageType::SendImage),
            "GetImage" | "GetImageKrita" => Some(MessageType::GetImage),
            "DocumentSync" => Some(MessageType::DocumentSync),
            _ => None,
        }
    }

    /// Maps an integer code from the first encoder revision.
    pub fn from_legacy_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(MessageType::SendImage),
            1 => Some(MessageType::GetImage),
            2 => Some(MessageType::DocumentSync),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
