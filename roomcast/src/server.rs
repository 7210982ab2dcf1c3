//! Roomcast server lifecycle
//!
//! Binds the HTTP listener, serves signaling until a shutdown signal
//! arrives, then drains open connections before returning.

use std::sync::Arc;
use std::time::Duration;

use roomcast_api::observability::metrics;
use roomcast_api::{create_router, AppState, Gateway};
use roomcast_core::{Config, LocalEngine};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct RoomcastServer {
    config: Arc<Config>,
    gateway: Arc<Gateway>,
}

impl RoomcastServer {
    pub fn new(config: Config) -> Self {
        let engine = Arc::new(LocalEngine::new(&config.engine));
        let gateway = Arc::new(Gateway::new(engine, config.signaling.clone()));
        Self {
            config: Arc::new(config),
            gateway,
        }
    }

    /// Serve until the HTTP server stops or a shutdown signal arrives
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let http_handle = self.start_http_server(shutdown_rx).await?;

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);
        self.drain().await;
        Ok(())
    }

    async fn start_http_server(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let router = create_router(AppState::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.config),
        ));

        Ok(tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        }))
    }

    /// Wait for signaling connections to finish their cleanup
    async fn drain(&self) {
        let active = metrics::CONNECTIONS_ACTIVE.get();
        if active > 0 {
            info!(
                "Waiting up to {}s for {} connection(s) to drain...",
                DRAIN_TIMEOUT.as_secs(),
                active
            );
            let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
            loop {
                let remaining = metrics::CONNECTIONS_ACTIVE.get();
                if remaining <= 0 {
                    info!("All connections drained");
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        "Drain timeout reached with {} connection(s) still active",
                        remaining
                    );
                    break;
                }
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        }

        info!(
            rooms = self.gateway.registry().room_count(),
            "Roomcast server shut down complete"
        );
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
