//! Single-consumer outbound queue.
//!
//! Producers enqueue `(payload, attachments, target)` items from any
//! thread without blocking; one long-lived task encodes and delivers them
//! in global FIFO order.

use std::sync::Arc;

use cksync_imaging::{ImageCodec, RawImage};
use cksync_protocol::{Payload, encode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::HubError;
use crate::registry::{ConnectionRegistry, Target};

/// One image attached to an outbound frame.
#[derive(Debug, Clone)]
pub enum Attachment {
    /// Already PNG-encoded.
    Png(Vec<u8>),
    /// Encoded by the publisher just before sending.
    Raw(RawImage),
}

/// One pending send.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub payload: Payload,
    pub attachments: Vec<Attachment>,
    pub target: Target,
}

impl Outbound {
    pub fn new(payload: impl Into<Payload>, target: Target) -> Self {
        Self {
            payload: payload.into(),
            attachments: Vec::new(),
            target,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Producer handle. Cloneable; enqueueing never blocks.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Consumer end, handed to [`publish_loop`].
pub struct PublishQueue {
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Publisher {
    pub fn new() -> (Self, PublishQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, PublishQueue { rx })
    }

    /// Queues an item. Fails only if the consumer has stopped.
    pub fn enqueue(&self, item: Outbound) -> Result<(), HubError> {
        self.tx.send(item).map_err(|_| HubError::QueueClosed)
    }
}

/// Drains `queue` until cancelled, delivering each item through `registry`.
///
/// A failing item is logged and skipped; the loop keeps going.
pub async fn publish_loop(
    mut queue: PublishQueue,
    registry: Arc<ConnectionRegistry>,
    codec: Arc<dyn ImageCodec>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = queue.rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let Outbound {
            payload,
            attachments,
            target,
        } = item;
        let msg_type = payload.message_type();
        match build_frame(payload, attachments, Arc::clone(&codec)).await {
            Ok(bytes) => {
                let delivered = registry.send(&target, bytes).await;
                tracing::trace!(%msg_type, ?target, delivered, "published frame");
            }
            Err(e) => {
                tracing::error!(%msg_type, ?target, "dropping outbound frame: {e}");
            }
        }
    }
    tracing::debug!("publish loop stopped");
}

/// PNG-encodes raw attachments and serializes the frame on the blocking pool.
async fn build_frame(
    payload: Payload,
    attachments: Vec<Attachment>,
    codec: Arc<dyn ImageCodec>,
) -> Result<Vec<u8>, HubError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, HubError> {
        let pngs = attachments
            .into_iter()
            .map(|a| match a {
                Attachment::Png(bytes) => Ok(bytes),
                Attachment::Raw(image) => codec.encode_png(&image),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(encode(&payload, &pngs)?)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Sender;
    use cksync_imaging::{ImageError, PngCodec};
    use cksync_protocol::{Frame, GetImagePayload, SendImagePayload};
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

    struct BrokenCodec;

    impl ImageCodec for BrokenCodec {
        fn encode_png(&self, _image: &RawImage) -> Result<Vec<u8>, ImageError> {
            Err(ImageError::Encode("broken".into()))
        }
        fn decode_png(&self, _png: &[u8]) -> Result<RawImage, ImageError> {
            Err(ImageError::Decode("broken".into()))
        }
    }

    async fn next_frame(rx: &mut mpsc::Receiver<WsMessage>) -> Frame {
        match rx.recv().await {
            Some(WsMessage::Binary(data)) => Frame::decode(&data).unwrap(),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, mpsc::Receiver<WsMessage>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (sender, rx) = Sender::channel(CancellationToken::new());
        registry.register("s1", sender);
        (registry, rx)
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let (registry, mut rx) = setup();
        let (publisher, queue) = Publisher::new();
        let cancel = CancellationToken::new();

        for i in 0..5 {
            publisher
                .enqueue(Outbound::new(
                    GetImagePayload::new("d", "l", format!("p{i}")),
                    Target::Broadcast,
                ))
                .unwrap();
        }

        let handle = tokio::spawn(publish_loop(
            queue,
            registry,
            Arc::new(PngCodec),
            cancel.clone(),
        ));

        for i in 0..5 {
            match next_frame(&mut rx).await.payload {
                Payload::GetImage(p) => assert_eq!(p.filename_prefix, format!("p{i}")),
                other => panic!("unexpected payload {other:?}"),
            }
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn raw_attachments_are_png_encoded() {
        let (registry, mut rx) = setup();
        let (publisher, queue) = Publisher::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(publish_loop(
            queue,
            registry,
            Arc::new(PngCodec),
            cancel.clone(),
        ));

        publisher
            .enqueue(
                Outbound::new(
                    SendImagePayload::new("d", "bg", "r"),
                    Target::Session("s1".into()),
                )
                .with_attachment(Attachment::Raw(RawImage::blank(3, 2)))
                .with_attachment(Attachment::Png(vec![9, 9])),
            )
            .unwrap();

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.attachments.len(), 2);
        let decoded = PngCodec.decode_png(&frame.attachments[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
        assert_eq!(frame.attachments[1], vec![9, 9]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failed_item_does_not_stop_loop() {
        let (registry, mut rx) = setup();
        let (publisher, queue) = Publisher::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(publish_loop(
            queue,
            registry,
            Arc::new(BrokenCodec),
            cancel.clone(),
        ));

        publisher
            .enqueue(
                Outbound::new(SendImagePayload::new("d", "bg", "r"), Target::Broadcast)
                    .with_attachment(Attachment::Raw(RawImage::blank(1, 1))),
            )
            .unwrap();
        publisher
            .enqueue(Outbound::new(
                GetImagePayload::new("d", "l", "after"),
                Target::Broadcast,
            ))
            .unwrap();

        match next_frame(&mut rx).await.payload {
            Payload::GetImage(p) => assert_eq!(p.filename_prefix, "after"),
            other => panic!("unexpected payload {other:?}"),
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_fails_once_consumer_is_gone() {
        let (publisher, queue) = Publisher::new();
        drop(queue);
        let err = publisher
            .enqueue(Outbound::new(GetImagePayload::new("d", "l", "p"), Target::Broadcast))
            .unwrap_err();
        assert!(matches!(err, HubError::QueueClosed));
    }
}
