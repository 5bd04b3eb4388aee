//! Live sessions keyed by session id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use crate::connection::Sender;

/// Delivery target of an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every registered session.
    Broadcast,
    /// One session; a no-op if it is not registered.
    Session(String),
}

/// Proof of one `register` call.
///
/// Passing it to [`ConnectionRegistry::release`] removes the entry only
/// if it still belongs to that registration, so a superseded
/// connection's teardown never evicts its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    session_id: String,
    conn_id: u64,
}

impl Registration {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

struct SessionHandle {
    conn_id: u64,
    sender: Sender,
}

/// Maps session ids to their live socket.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    next_conn: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` under `session_id`.
    ///
    /// A previous socket under the same id is closed and replaced.
    pub fn register(&self, session_id: &str, sender: Sender) -> Registration {
        let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), SessionHandle { conn_id, sender });

        if let Some(old) = previous {
            tracing::info!(session = %session_id, "replacing existing session socket");
            old.sender.close();
        } else {
            tracing::debug!(session = %session_id, "session registered");
        }

        Registration {
            session_id: session_id.to_string(),
            conn_id,
        }
    }

    /// Removes a session regardless of which connection registered it.
    pub fn unregister(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        match removed {
            Some(handle) => {
                handle.sender.close();
                true
            }
            None => false,
        }
    }

    /// Removes the entry created by `registration` if it is still current.
    pub fn release(&self, registration: &Registration) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let current = sessions
            .get(&registration.session_id)
            .is_some_and(|h| h.conn_id == registration.conn_id);
        if current {
            sessions.remove(&registration.session_id);
            tracing::debug!(session = %registration.session_id, "session released");
        }
        current
    }

    /// Sends one encoded frame to `target`.
    ///
    /// A directed send waits for room in the session's buffer; a
    /// broadcast skips sockets whose buffer is full. Per-socket failures
    /// are logged. Returns the number of sockets the frame was queued on.
    pub async fn send(&self, target: &Target, frame: Vec<u8>) -> usize {
        let msg = WsMessage::binary(frame);

        match target {
            Target::Session(id) => {
                let sender = self
                    .sessions
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(id)
                    .map(|h| h.sender.clone());
                let Some(sender) = sender else {
                    tracing::debug!(session = %id, "send to unknown session ignored");
                    return 0;
                };
                match sender.deliver(msg).await {
                    Ok(()) => 1,
                    Err(e) => {
                        tracing::warn!(session = %id, "send failed: {e}");
                        0
                    }
                }
            }
            Target::Broadcast => {
                let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
                let mut delivered = 0;
                for (id, handle) in sessions.iter() {
                    match handle.sender.send_message(msg.clone()) {
                        Ok(()) => delivered += 1,
                        Err(e) => tracing::warn!(session = %id, "broadcast send failed: {e}"),
                    }
                }
                delivered
            }
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every session and empties the registry.
    pub fn close_all(&self) {
        let drained: Vec<SessionHandle> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, h)| h)
            .collect();
        for handle in drained {
            handle.sender.close();
        }
    }
}
