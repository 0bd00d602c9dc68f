//! Graceful shutdown on SIGINT and SIGTERM.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolve once SIGINT or SIGTERM arrives, or `cancel` is triggered elsewhere.
/// Cancels `cancel` before returning so background work can wind down.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = cancel.cancelled() => info!("Shutdown requested"),
    }

    cancel.cancel();
}
