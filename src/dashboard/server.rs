//! Dashboard Server
//!
//! Binds the REST router and serves it until shutdown is requested or the
//! process receives Ctrl-C.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::rest::{router, DashboardState};

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the dashboard server
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Bind address
    pub addr: SocketAddr,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

// =============================================================================
// Dashboard Server
// =============================================================================

pub struct DashboardServer {
    config: DashboardConfig,
    state: DashboardState,
    shutdown_tx: broadcast::Sender<()>,
}

impl DashboardServer {
    pub fn new(config: DashboardConfig, state: DashboardState) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Serve until shutdown. A failed initial connection is logged; the
    /// dashboard then starts unauthenticated.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if let Err(e) = self.state.reconnect().await {
            warn!("Starting without an Azure connection: {}", e);
        }

        let app = router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind dashboard on {}: {}", self.config.addr, e)))?;

        info!("Dashboard listening on http://{}", self.config.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_rx.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                info!("Dashboard shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("Dashboard server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
