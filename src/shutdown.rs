//! Graceful shutdown coordination.
//!
//! [`ShutdownSignal`] turns Ctrl+C / SIGTERM into a broadcast that the poll
//! loop checks between cycles and the relay host uses to drain connections.
//!
//! ```rust,ignore
//! use siren::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let listener = shutdown.clone();
//! tokio::spawn(async move { listener.listen().await });
//! cycle.run(interval, &shutdown).await?;
//! ```

use tokio::sync::broadcast;
use tracing::{error, info};

/// A cloneable signal for coordinating shutdown across components.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    /// Wait for Ctrl+C or SIGTERM, then notify all receivers.
    pub async fn listen(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
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
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        let _ = self.sender.send(());
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Trigger shutdown manually (for testing or programmatic shutdown).
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
