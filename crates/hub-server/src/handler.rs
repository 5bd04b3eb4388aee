//! Handler trait for processing decoded frames.
//!
//! Implementors provide the pipeline-side logic (document tracking,
//! layer replies) while the server handles sessions, pumps and the
//! frame codec.

use std::future::Future;
use std::pin::Pin;

use cksync_protocol::{DocumentSyncPayload, GetImagePayload, SendImagePayload};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling frames received from canvas peers.
///
/// Each method receives the id of the session the frame arrived on.
/// Default implementations log and drop the frame so handlers only need
/// to override the payload types they care about.
pub trait Handler: Send + Sync + 'static {
    /// Called for `SendImage` frames. Peers do not normally push images
    /// to the hub.
    fn on_send_image(
        &self,
        session: String,
        payload: SendImagePayload,
        attachments: Vec<Vec<u8>>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::warn!(
                %session,
                document = %payload.document_id,
                attachments = attachments.len(),
                "unexpected SendImage from peer, dropping"
            );
        })
    }

    /// Called for `GetImage` frames, i.e. layer replies.
    fn on_get_image(
        &self,
        session: String,
        payload: GetImagePayload,
        attachments: Vec<Vec<u8>>,
    ) -> HandlerFuture<'_> {
        let _ = attachments;
        Box::pin(async move {
            tracing::warn!(%session, prefix = %payload.filename_prefix, "GetImage not handled");
        })
    }

    /// Called for `DocumentSync` frames.
    fn on_document_sync(&self, session: String, payload: DocumentSyncPayload) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::warn!(
                %session,
                documents = payload.document_list.len(),
                "DocumentSync not handled"
            );
        })
    }

    /// Called once a session's pumps have stopped (cleanup hook).
    fn on_session_closed(&self, session: String) -> HandlerFuture<'_> {
        let _ = session;
        Box::pin(async {})
    }
}
