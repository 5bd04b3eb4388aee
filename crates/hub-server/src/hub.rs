//! Shared hub context.
//!
//! One [`Hub`] is built at startup and handed (as `Arc<Hub>`) to the
//! server and to every pipeline component that sends images or fetches
//! layers. It owns the session registry, the document registry, the
//! outbound queue and the set of in-flight layer requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cksync_imaging::{ImageCodec, PngCodec, RawImage};
use cksync_protocol::{DocumentSyncPayload, GetImagePayload, SendImagePayload};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::HubError;
use crate::connection::SessionMeta;
use crate::documents::{DocumentEntry, DocumentRegistry};
use crate::exchange::TempExchange;
use crate::handler::{Handler, HandlerFuture};
use crate::publisher::{Attachment, Outbound, PublishQueue, Publisher, publish_loop};
use crate::registry::{ConnectionRegistry, Target};
use crate::types::{HubConfig, HubEvent};

type LayerReply = Result<Vec<u8>, HubError>;

struct PendingRequest {
    session_id: String,
    document_id: String,
    layer: String,
    reply: oneshot::Sender<LayerReply>,
}

pub struct Hub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    documents: RwLock<DocumentRegistry>,
    publisher: Publisher,
    queue: Mutex<Option<PublishQueue>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    event_tx: mpsc::UnboundedSender<HubEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<HubEvent>>>,
    exchange: Option<TempExchange>,
    codec: Arc<dyn ImageCodec>,
}

impl Hub {
    /// Creates a hub using the built-in PNG codec.
    pub fn new(config: HubConfig) -> Self {
        Self::with_codec(config, Arc::new(PngCodec))
    }

    pub fn with_codec(config: HubConfig, codec: Arc<dyn ImageCodec>) -> Self {
        let (publisher, queue) = Publisher::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let exchange = config.temp_dir.clone().map(TempExchange::new);
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            documents: RwLock::new(DocumentRegistry::new()),
            publisher,
            queue: Mutex::new(Some(queue)),
            pending: Mutex::new(HashMap::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            exchange,
            codec,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<HubEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Spawns the publish loop. Only one may run per hub.
    pub fn start_publisher(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, HubError> {
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(HubError::AlreadyRunning)?;
        Ok(tokio::spawn(publish_loop(
            queue,
            Arc::clone(&self.registry),
            Arc::clone(&self.codec),
            cancel,
        )))
    }

    pub(crate) fn emit(&self, event: HubEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn session_opened(&self, meta: &SessionMeta) {
        tracing::info!(
            session = %meta.session_id,
            client_type = %meta.client_type,
            remote = %meta.remote_addr,
            "peer session opened"
        );
        self.emit(HubEvent::SessionConnected {
            session_id: meta.session_id.clone(),
            client_type: meta.client_type.clone(),
        });
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Current document selector keys.
    pub fn combo(&self) -> Vec<String> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .combo()
    }

    /// Keeps `key` in the selector even while no peer reports it.
    pub fn ensure_combo_entry(&self, key: &str) {
        let changed = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .ensure_combo_entry(key);
        if changed {
            self.emit(HubEvent::DocumentsChanged {
                combo: self.combo(),
            });
        }
    }

    fn resolve(&self, document_key: &str) -> Result<DocumentEntry, HubError> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let entry = documents
            .resolve(document_key)
            .ok_or_else(|| HubError::UnknownDocument(document_key.to_string()))?;
        if !self.registry.contains(&entry.session_id) {
            return Err(HubError::SessionGone(entry.session_id.clone()));
        }
        Ok(entry.clone())
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Queues generated images for the layer `layer` of the document
    /// shown as `document_key`.
    pub fn send_images(
        &self,
        document_key: &str,
        layer: &str,
        run_id: &str,
        append_to_previous_run: bool,
        images: Vec<RawImage>,
    ) -> Result<(), HubError> {
        let entry = self.resolve(document_key)?;
        let mut payload = SendImagePayload::new(&entry.document_id, layer, run_id);
        payload.append_to_previous_run = append_to_previous_run;

        let count = images.len();
        let mut item = Outbound::new(payload, Target::Session(entry.session_id.clone()));
        item.attachments = images.into_iter().map(Attachment::Raw).collect();
        self.publisher.enqueue(item)?;

        tracing::debug!(
            session = %entry.session_id,
            document = %entry.document_id,
            %layer,
            %run_id,
            count,
            "queued images"
        );
        Ok(())
    }

    /// Fetches a layer's pixels from the peer that owns `document_key`.
    ///
    /// Waits for the peer's reply frame up to the configured timeout.
    pub async fn request_layer(
        &self,
        document_key: &str,
        layer: &str,
    ) -> Result<RawImage, HubError> {
        let entry = self.resolve(document_key)?;
        let prefix = new_prefix();

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                prefix.clone(),
                PendingRequest {
                    session_id: entry.session_id.clone(),
                    document_id: entry.document_id.clone(),
                    layer: layer.to_string(),
                    reply: tx,
                },
            );

        let payload = GetImagePayload::new(&entry.document_id, layer, &prefix);
        if let Err(e) = self
            .publisher
            .enqueue(Outbound::new(payload, Target::Session(entry.session_id.clone())))
        {
            self.take_pending(&prefix);
            return Err(e);
        }
        tracing::debug!(session = %entry.session_id, %layer, %prefix, "requested layer");

        let png = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(_)) => return Err(HubError::SessionGone(entry.session_id)),
            Err(_) => {
                self.take_pending(&prefix);
                tracing::warn!(%layer, %prefix, "layer request timed out");
                return Err(HubError::Timeout(prefix));
            }
        };
        self.decode(png).await
    }

    /// Fetches a layer through the temp-file exchange instead of the socket.
    pub async fn request_layer_via_file(
        &self,
        document_key: &str,
        layer: &str,
    ) -> Result<RawImage, HubError> {
        let exchange = self.exchange.as_ref().ok_or_else(|| {
            HubError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no temp directory configured",
            ))
        })?;
        let entry = self.resolve(document_key)?;
        let prefix = new_prefix();

        let payload = GetImagePayload::new(&entry.document_id, layer, &prefix);
        self.publisher
            .enqueue(Outbound::new(payload, Target::Session(entry.session_id)))?;

        let png = exchange.wait_for(&prefix, self.config.request_timeout).await?;
        self.decode(png).await
    }

    async fn decode(&self, png: Vec<u8>) -> Result<RawImage, HubError> {
        let codec = Arc::clone(&self.codec);
        Ok(tokio::task::spawn_blocking(move || codec.decode_png(&png)).await??)
    }

    fn take_pending(&self, prefix: &str) -> Option<PendingRequest> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(prefix)
    }

    /// Takes the request under `prefix` only if `session_id` was asked.
    fn take_pending_from(&self, prefix: &str, session_id: &str) -> Option<PendingRequest> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.get(prefix) {
            Some(request) if request.session_id == session_id => pending.remove(prefix),
            _ => None,
        }
    }

    fn fail_pending_for(&self, session_id: &str) {
        let failed: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let prefixes: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.session_id == session_id)
                .map(|(k, _)| k.clone())
                .collect();
            prefixes
                .iter()
                .filter_map(|k| pending.remove(k))
                .collect()
        };
        for request in failed {
            let _ = request
                .reply
                .send(Err(HubError::SessionGone(session_id.to_string())));
        }
    }

    async fn save_to_exchange(&self, prefix: &str, png: &[u8]) {
        let Some(exchange) = self.exchange.as_ref() else {
            tracing::warn!(%prefix, "unmatched layer reply and no temp dir, dropping");
            return;
        };
        match exchange.save(prefix, png).await {
            Ok(path) => self.emit(HubEvent::ImageSaved {
                prefix: prefix.to_string(),
                path,
            }),
            Err(e) => tracing::error!(%prefix, "failed to save layer reply: {e}"),
        }
    }
}

fn new_prefix() -> String {
    format!("cks_{}", uuid::Uuid::new_v4().simple())
}

impl Handler for Hub {
    fn on_get_image(
        &self,
        session: String,
        payload: GetImagePayload,
        attachments: Vec<Vec<u8>>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            let prefix = payload.filename_prefix;
            let png = attachments.into_iter().next();

            if let Some(request) = self.take_pending_from(&prefix, &session) {
                let reply = png.ok_or(HubError::LayerUnavailable {
                    document_id: request.document_id,
                    layer: request.layer,
                });
                let _ = request.reply.send(reply);
                return;
            }

            match png {
                Some(png) => self.save_to_exchange(&prefix, &png).await,
                None => tracing::warn!(
                    %session,
                    %prefix,
                    layer = %payload.layer,
                    "peer could not provide layer"
                ),
            }
        })
    }

    fn on_document_sync(&self, session: String, payload: DocumentSyncPayload) -> HandlerFuture<'_> {
        Box::pin(async move {
            let combo = {
                let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
                documents.sync(&session, &payload.document_list);
                let pruned = documents.prune(|s| self.registry.contains(s));
                if pruned > 0 {
                    tracing::debug!(pruned, "dropped documents of closed sessions");
                }
                documents.combo()
            };
            tracing::info!(%session, documents = payload.document_list.len(), "document sync");
            self.emit(HubEvent::DocumentsChanged { combo });
        })
    }

    fn on_session_closed(&self, session: String) -> HandlerFuture<'_> {
        Box::pin(async move {
            if self.registry.contains(&session) {
                // Replaced by a newer socket under the same id.
                tracing::debug!(%session, "superseded connection closed");
                return;
            }

            self.fail_pending_for(&session);
            let removed = self
                .documents
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove_session(&session);

            tracing::info!(%session, "peer session closed");
            self.emit(HubEvent::SessionClosed {
                session_id: session,
            });
            if removed > 0 {
                self.emit(HubEvent::DocumentsChanged {
                    combo: self.combo(),
                });
            }
        })
    }
}
