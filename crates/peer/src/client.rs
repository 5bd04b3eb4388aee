//! Reconnecting hub client.
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --dial ok--> Connected
//!      ^                        |  ^                     |
//!      +----cancel()------------+  +--lost / dial err----+
//!      +----disconnect()-----------------------------------+
//! ```
//!
//! One background task owns each attempt. It is tied to a cancellation
//! token stored next to the state; `cancel`/`disconnect` cancel the token
//! under the same lock that the task checks before every state change, so
//! a cancelled task can never move the state again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cksync_imaging::{ImageCodec, PngCodec};
use cksync_protocol::constants::WS_PING_PERIOD;
use cksync_protocol::{DocumentSyncPayload, Frame};

use crate::host::DocumentHost;
use crate::index::ImageIndex;
use crate::transport::{BoxedTransport, Dialer, TungsteniteDialer};
use crate::types::{ConnectionState, PeerConfig, PeerEvent};
use crate::{PeerError, SEND_BUFFER_SIZE, dispatch, pumps};

#[derive(Default)]
struct Control {
    state: ConnectionState,
    /// Token of the running attempt task, if any.
    attempt: Option<CancellationToken>,
    /// Outbound channel of the live connection.
    outbound: Option<mpsc::Sender<WsMessage>>,
}

pub(crate) struct Inner {
    pub(crate) config: PeerConfig,
    pub(crate) session_id: String,
    pub(crate) host: Arc<dyn DocumentHost>,
    pub(crate) codec: Arc<dyn ImageCodec>,
    pub(crate) index: ImageIndex,
    dialer: Arc<dyn Dialer>,
    runtime: Option<Handle>,
    control: Mutex<Control>,
    event_tx: mpsc::UnboundedSender<PeerEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

/// Handle to the peer client. Cheap to clone.
///
/// Every method is synchronous and safe to call from any thread. The
/// connection itself runs on the runtime the client was built in, or on
/// the one given to [`PeerClient::with_runtime`].
#[derive(Clone)]
pub struct PeerClient {
    pub(crate) inner: Arc<Inner>,
}

impl PeerClient {
    /// Creates a client using real sockets and the built-in PNG codec.
    pub fn new(config: PeerConfig, host: Arc<dyn DocumentHost>) -> Self {
        Self::with_parts(config, host, Arc::new(PngCodec), Arc::new(TungsteniteDialer))
    }

    /// Creates a client bound to the runtime of the calling context, if any.
    pub fn with_parts(
        config: PeerConfig,
        host: Arc<dyn DocumentHost>,
        codec: Arc<dyn ImageCodec>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self::build(config, host, codec, dialer, Handle::try_current().ok())
    }

    /// Creates a client whose connection runs on `runtime`, for hosts
    /// that call in from threads outside it.
    pub fn with_runtime(
        config: PeerConfig,
        host: Arc<dyn DocumentHost>,
        codec: Arc<dyn ImageCodec>,
        dialer: Arc<dyn Dialer>,
        runtime: Handle,
    ) -> Self {
        Self::build(config, host, codec, dialer, Some(runtime))
    }

    fn build(
        config: PeerConfig,
        host: Arc<dyn DocumentHost>,
        codec: Arc<dyn ImageCodec>,
        dialer: Arc<dyn Dialer>,
        runtime: Option<Handle>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                // Kept for the client's lifetime so the hub can match reconnects.
                session_id: uuid::Uuid::new_v4().to_string(),
                host,
                codec,
                index: ImageIndex::new(),
                dialer,
                runtime,
                control: Mutex::new(Control::default()),
                event_tx,
                event_rx: Mutex::new(Some(event_rx)),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.control().state
    }

    pub fn index(&self) -> &ImageIndex {
        &self.inner.index
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.inner
            .event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Starts connecting. A no-op while connecting or connected.
    ///
    /// Fails with [`PeerError::NoRuntime`], leaving the state untouched,
    /// if the client has no runtime and none is current.
    pub fn connect(&self) -> Result<(), PeerError> {
        let runtime = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(PeerError::NoRuntime)?;

        let mut control = self.inner.control();
        if control.attempt.is_some() {
            debug!(state = %control.state, "connect ignored, attempt already active");
            return Ok(());
        }
        let token = CancellationToken::new();
        control.attempt = Some(token.clone());
        self.inner.transition(&mut control, ConnectionState::Connecting);
        drop(control);

        runtime.spawn(run(Arc::clone(&self.inner), token));
        Ok(())
    }

    /// Abandons the current attempt or connection without retrying.
    ///
    /// Safe to call in any state.
    pub fn cancel(&self) {
        self.stop("connection cancelled");
    }

    /// Closes the connection on user request. No retry follows.
    pub fn disconnect(&self) {
        self.stop("disconnected by user");
    }

    fn stop(&self, reason: &str) {
        let mut control = self.inner.control();
        if let Some(token) = control.attempt.take() {
            token.cancel();
            info!("{reason}");
        }
        control.outbound = None;
        self.inner.transition(&mut control, ConnectionState::Disconnected);
    }

    /// Queues a frame on the live connection.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), PeerError> {
        self.inner.send_frame(frame)
    }

    /// Sends the host's full document list to the hub.
    pub fn sync_documents(&self) -> Result<(), PeerError> {
        self.inner.sync_documents()
    }

    /// Purges the history of a closed document and re-syncs the list.
    pub fn document_closed(&self, document_id: &str) {
        let removed = self.inner.index.clear(document_id);
        debug!(document = %document_id, removed, "document closed");
        self.inner
            .emit(PeerEvent::DocumentChanged(document_id.to_string()));
        match self.inner.sync_documents() {
            Ok(()) | Err(PeerError::NotConnected) => {}
            Err(e) => warn!("document sync after close failed: {e}"),
        }
    }

    /// Removes one image from the history.
    pub fn discard_image(&self, document_id: &str, run_id: &str, image_id: uuid::Uuid) -> bool {
        self.inner.index.discard(document_id, run_id, image_id)
    }
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: PeerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn transition(&self, control: &mut Control, state: ConnectionState) {
        if control.state != state {
            debug!(from = %control.state, to = %state, "connection state changed");
            control.state = state;
            self.emit(PeerEvent::StateChanged(state));
        }
    }

    /// Moves to `state` on behalf of the attempt owning `token`.
    ///
    /// Returns `false` (and changes nothing) if that attempt was cancelled.
    fn transition_for(
        &self,
        token: &CancellationToken,
        state: ConnectionState,
        outbound: Option<mpsc::Sender<WsMessage>>,
    ) -> bool {
        let mut control = self.control();
        if token.is_cancelled() {
            return false;
        }
        control.outbound = outbound;
        self.transition(&mut control, state);
        true
    }

    pub(crate) fn send_frame(&self, frame: &Frame) -> Result<(), PeerError> {
        let tx = self
            .control()
            .outbound
            .clone()
            .ok_or(PeerError::NotConnected)?;
        let bytes = frame.encode()?;
        tx.try_send(WsMessage::binary(bytes)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PeerError::SendBufferFull,
            mpsc::error::TrySendError::Closed(_) => PeerError::NotConnected,
        })
    }

    pub(crate) fn sync_documents(&self) -> Result<(), PeerError> {
        let documents = self.host.list_documents();
        let count = documents.len();
        self.send_frame(&Frame::new(DocumentSyncPayload::new(documents)))?;
        debug!(count, "sent document list");
        Ok(())
    }
}

/// Attempt task: dial, serve, and redial after a fixed delay until cancelled.
async fn run(inner: Arc<Inner>, token: CancellationToken) {
    let url = inner.config.ws_url(&inner.session_id);
    let delay = inner.config.retry_delay;

    loop {
        debug!(%url, "dialing hub");
        let dialed = tokio::select! {
            _ = token.cancelled() => return,
            result = inner.dialer.dial(&url) => result,
        };

        match dialed {
            Ok(transport) => {
                serve(&inner, transport, &token).await;
                if !inner.transition_for(&token, ConnectionState::Connecting, None) {
                    return;
                }
                warn!("connection to hub lost, retrying in {delay:?}");
            }
            Err(e) => {
                warn!(%url, "failed to connect to hub: {e}; retrying in {delay:?}");
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Runs one live connection until it ends or `token` is cancelled.
async fn serve(inner: &Arc<Inner>, transport: BoxedTransport, token: &CancellationToken) {
    let conn = token.child_token();
    let (sink, stream) = transport.split();
    let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let write = tokio::spawn(pumps::write::write_pump(
        sink,
        rx,
        conn.clone(),
        WS_PING_PERIOD,
    ));
    let dispatcher = tokio::spawn(dispatch::inbound_loop(Arc::clone(inner), inbound_rx));

    if inner.transition_for(token, ConnectionState::Connected, Some(tx.clone())) {
        info!(session = %inner.session_id, "connected to hub");
        if let Err(e) = inner.sync_documents() {
            warn!("initial document sync failed: {e}");
        }
        pumps::read::read_pump(stream, tx, conn.clone(), |data| {
            let _ = inbound_tx.send(data.to_vec());
        })
        .await;
    }

    conn.cancel();
    drop(inbound_tx);
    let _ = write.await;
    let _ = dispatcher.await;
}
