//! Graceful Shutdown Handler
//!
//! Coordinated shutdown for the hunt coordinator's background tasks:
//! a broadcast signal fans out to every loop (autopilot, settlement sweep,
//! cache sweep, persistence flusher), then the caller performs the final
//! synchronous flush before exiting.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::info;

/// Broadcast-based shutdown coordinator. Cloneable handles are cheap;
/// every background loop holds a receiver and exits its `select!` when the
/// signal fires.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    requested: std::sync::Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self {
            tx,
            requested: std::sync::Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("shutdown requested");
            let _ = self.tx.send(());
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Block until SIGINT or SIGTERM, then trigger.
    pub async fn listen_for_signals(&self) {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = terminate => info!("received SIGTERM"),
        }
        self.trigger();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
