use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use sealchat_core::{Directory, RelayService};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::metrics::RelayMetrics;

pub struct RelayServer {
    config: ServerConfig,
    directory: Arc<Directory>,
    hub: Arc<Hub>,
    metrics: Arc<RelayMetrics>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let metrics = Arc::new(RelayMetrics::new()?);
        let directory = Arc::new(Directory::new(config.directory_config()));
        let hub = Arc::new(Hub::new(config.outbound_queue_len, Arc::clone(&metrics)));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            directory,
            hub,
            metrics,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            service: RelayService::new(Arc::clone(&self.directory), Arc::clone(&self.hub)),
            directory: Arc::clone(&self.directory),
            hub: Arc::clone(&self.hub),
            metrics: Arc::clone(&self.metrics),
            max_frame_bytes: self.config.max_frame_bytes,
            shutdown: self.shutdown_tx.subscribe(),
        };

        Router::new()
            .route("/ws", get(crate::api::ws_handler))
            .route("/health", get(crate::api::get_health))
            .route("/metrics", get(crate::api::get_metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        info!("sealchat-relay listening on {}", self.config.listen_addr);

        let shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let signal = async move {
            Self::shutdown_signal(shutdown_rx).await;
            // Tell open sockets to close so graceful shutdown can finish.
            shutdown_tx.send_replace(true);
        };

        let serve = axum::serve(listener, self.router()).with_graceful_shutdown(signal);
        let mut server = tokio::spawn(async move { serve.await });

        let mut stopping = self.shutdown_tx.subscribe();
        tokio::select! {
            result = &mut server => return Ok(result??),
            _ = stopping.changed() => {}
        }

        match tokio::time::timeout(self.config.shutdown_timeout(), server).await {
            Ok(result) => result??,
            Err(_) => warn!(
                "graceful shutdown timed out after {}s",
                self.config.shutdown_timeout_secs
            ),
        }
        info!("sealchat-relay stopped");

        Ok(())
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Shutdown requested");
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
