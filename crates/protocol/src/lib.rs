//! Wire protocol shared by the hub and its peers.
//!
//! One WebSocket binary message is one [`Frame`]: a JSON control
//! [`Payload`] followed by zero or more PNG attachments.

pub mod constants;
pub mod error;
pub mod frame;
pub mod payload;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use error::FrameError;
pub use frame::{Frame, SegmentKind, decode, encode};
pub use payload::{DocumentRef, DocumentSyncPayload, GetImagePayload, Payload, SendImagePayload};
