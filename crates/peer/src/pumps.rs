//! Per-connection WebSocket pumps.

pub(crate) mod read;
pub(crate) mod write;
