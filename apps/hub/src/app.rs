//! Application orchestrator: wires the hub, its server and event logging.

use std::future::Future;
use std::sync::Arc;

use cksync_hub_server::{Hub, HubEvent, HubServer};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the hub until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    run_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for Ctrl-C: {e}");
        }
        tracing::info!("SIGINT received, shutting down");
    })
    .await
}

async fn run_until(config: Config, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let hub = Arc::new(Hub::new(config.hub_config()));

    // -- Event log --
    let events = hub.take_events();
    let log_cancel = cancel.clone();
    let event_log = tokio::spawn(async move {
        let Some(mut events) = events else { return };
        loop {
            tokio::select! {
                _ = log_cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => log_event(&event),
                    None => break,
                },
            }
        }
    });

    // -- WS server --
    let server = HubServer::new(Arc::clone(&hub));
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    let server_result = tokio::select! {
        _ = shutdown => None,
        result = &mut server_task => Some(result),
    };

    tracing::info!("stopping hub...");
    server.shutdown();
    cancel.cancel();
    let _ = event_log.await;
    match server_result {
        Some(result) => result??,
        None => server_task.await??,
    }
    Ok(())
}

fn log_event(event: &HubEvent) {
    match event {
        HubEvent::SessionConnected {
            session_id,
            client_type,
        } => tracing::info!(session = %session_id, %client_type, "peer connected"),
        HubEvent::SessionClosed { session_id } => {
            tracing::info!(session = %session_id, "peer disconnected")
        }
        HubEvent::DocumentsChanged { combo } => {
            tracing::info!(documents = ?combo, "document list changed")
        }
        HubEvent::ImageSaved { prefix, path } => {
            tracing::info!(%prefix, path = %path.display(), "layer saved to exchange")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_until_shutdown_future_resolves() {
        let config = Config {
            port: 0,
            ..Config::default()
        };
        let result = run_until(config, tokio::time::sleep(Duration::from_millis(50))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn bind_failure_ends_the_run() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = listener.local_addr().unwrap().port();
        let config = Config {
            port: taken,
            ..Config::default()
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_until(config, std::future::pending()),
        )
        .await
        .expect("run did not stop after bind failure");
        assert!(result.is_err());
    }
}
