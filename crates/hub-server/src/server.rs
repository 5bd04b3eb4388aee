//! Hub WebSocket server.
//!
//! Listens on a TCP port, upgrades `GET /{route}?clientId=..&clientType=..`
//! to WebSocket, and runs one session per peer. Any number of peers may
//! be connected at once.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use cksync_protocol::constants::{QUERY_CLIENT_ID, QUERY_CLIENT_TYPE, WS_MAX_MESSAGE_SIZE};

use crate::HubError;
use crate::connection::{self, SessionMeta};
use crate::handler::Handler;
use crate::hub::Hub;

/// The hub WebSocket server.
pub struct HubServer {
    hub: Arc<Hub>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HubServer {
    pub fn new(hub: Arc<Hub>) -> Arc<Self> {
        Arc::new(Self {
            hub,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server and every session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    ///
    /// Starts the hub's publish loop, binds the configured address and
    /// accepts WebSocket connections.
    pub async fn run(self: &Arc<Self>) -> Result<(), HubError> {
        let listener = TcpListener::bind(self.hub.config().socket_addr()).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);

        let publisher = self.hub.start_publisher(self.cancel.child_token())?;
        tracing::info!(
            "hub listening on ws://{local_addr}/{}",
            self.hub.config().route
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.hub.registry().close_all();
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }

        let _ = publisher.await;
        Ok(())
    }

    /// Handles a single TCP connection: upgrades to WS and runs the session
    /// until it closes.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), HubError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let mut request_uri: Option<Uri> = None;
        let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            request_uri = Some(req.uri().clone());
            Ok(resp)
        };
        let ws_stream = accept_hdr_async_with_config(stream, capture, Some(ws_config)).await?;

        let Some(uri) = request_uri else {
            tracing::warn!(%peer_addr, "handshake finished without a request URI");
            return Ok(());
        };
        let route = self.hub.config().route.as_str();
        if uri.path().trim_start_matches('/') != route {
            tracing::warn!(%peer_addr, path = uri.path(), "rejecting connection on unknown route");
            return Ok(());
        }

        let query = uri.query().unwrap_or_default();
        let session_id = match query_param(query, QUERY_CLIENT_ID) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().simple().to_string(),
        };
        let meta = SessionMeta {
            session_id,
            client_type: query_param(query, QUERY_CLIENT_TYPE)
                .unwrap_or_default()
                .to_string(),
            remote_addr: peer_addr.to_string(),
        };

        let (sender, rx) = connection::Sender::channel(self.cancel.child_token());
        let registration = self.hub.registry().register(&meta.session_id, sender.clone());
        self.hub.session_opened(&meta);

        connection::run_session(ws_stream, &meta, Arc::clone(&self.hub), sender, rx).await;

        self.hub.registry().release(&registration);
        self.hub.on_session_closed(meta.session_id).await;
        Ok(())
    }
}

/// Returns the raw value of `key` in a `k=v&k=v` query string.
fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then_some(v)
    })
}
