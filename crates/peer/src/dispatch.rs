//! Handling of frames received from the hub.
//!
//! Frames are handled one at a time in arrival order. PNG work and host
//! reads run on the blocking pool.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use cksync_imaging::{ImageCodec, RawImage};
use cksync_protocol::{Frame, GetImagePayload, Payload, SendImagePayload};

use crate::PeerError;
use crate::client::Inner;
use crate::types::PeerEvent;

/// Drains `inbound` until every sender is dropped.
pub(crate) async fn inbound_loop(inner: Arc<Inner>, mut inbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(data) = inbound.recv().await {
        handle_frame(&inner, &data).await;
    }
}

pub(crate) async fn handle_frame(inner: &Inner, data: &[u8]) {
    let frame = match Frame::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("dropping malformed frame ({} bytes): {e}", data.len());
            return;
        }
    };

    match frame.payload {
        Payload::SendImage(payload) => receive_images(inner, payload, frame.attachments).await,
        Payload::GetImage(payload) => answer_layer_request(inner, payload).await,
        Payload::DocumentSync(_) => debug!("ignoring DocumentSync sent to peer"),
    }
}

/// Decodes every attachment and files them as one batch.
///
/// A single undecodable attachment drops the whole frame so that a run
/// never ends up half-filled.
async fn receive_images(inner: &Inner, payload: SendImagePayload, attachments: Vec<Vec<u8>>) {
    let images = match decode_all(Arc::clone(&inner.codec), attachments).await {
        Ok(images) => images,
        Err(e) => {
            warn!(
                document = %payload.document_id,
                run = %payload.run_id,
                "dropping SendImage frame: {e}"
            );
            return;
        }
    };

    let (run_id, metas) = inner.index.add_images(
        &payload.document_id,
        &payload.run_id,
        &payload.layer,
        payload.append_to_previous_run,
        images,
    );
    inner.emit(PeerEvent::ImageAdded {
        document_id: payload.document_id,
        run_id,
        images: metas,
    });
}

async fn decode_all(
    codec: Arc<dyn ImageCodec>,
    pngs: Vec<Vec<u8>>,
) -> Result<Vec<RawImage>, PeerError> {
    let images = tokio::task::spawn_blocking(move || {
        pngs.iter()
            .map(|png| codec.decode_png(png))
            .collect::<Result<Vec<_>, _>>()
    })
    .await??;
    Ok(images)
}

/// Replies with the layer's pixels, or with no attachment if they cannot
/// be read.
async fn answer_layer_request(inner: &Inner, payload: GetImagePayload) {
    let png = match read_layer_png(inner, &payload).await {
        Ok(png) => Some(png),
        Err(e) => {
            warn!(
                document = %payload.document_id,
                layer = %payload.layer,
                "cannot read requested layer: {e}"
            );
            None
        }
    };

    let mut reply = Frame::new(payload);
    if let Some(png) = png {
        reply.add_png(png);
    }
    if let Err(e) = inner.send_frame(&reply) {
        warn!("failed to send layer reply: {e}");
    }
}

async fn read_layer_png(inner: &Inner, payload: &GetImagePayload) -> Result<Vec<u8>, PeerError> {
    let host = Arc::clone(&inner.host);
    let codec = Arc::clone(&inner.codec);
    let document_id = payload.document_id.clone();
    let layer_path = payload.layer.clone();

    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, PeerError> {
        let layer = host.find_layer(&document_id, &layer_path)?;
        let image = host.read_pixels(layer)?;
        Ok(codec.encode_png(&image)?)
    })
    .await?
}
