use crate::routes;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use pgkeep::catalog::Catalog;
use pgkeep::coordinator::{Collaborators, Coordinator};
use pgkeep::scheduler::Scheduler;
use pgkeep::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Scheduler plus HTTP status API until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = config.server.addr.clone();
    tracing::info!(
        "Starting pgkeep v{} for database {} ({})",
        env!("CARGO_PKG_VERSION"),
        config.database.name,
        config.timezone
    );

    let collaborators = Collaborators::from_config(&config);
    let catalog = Arc::new(Catalog::from_config(&config, collaborators.connector.clone()));
    let coordinator = Arc::new(Coordinator::new(config, collaborators)?);

    let scheduler = Arc::new(Scheduler::new(coordinator.clone()).await?);
    scheduler.start().await?;

    let cancel = CancellationToken::new();

    // Startup runs go in the background so the API is up immediately
    let startup = {
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = coordinator.run_startup() => {}
                _ = cancel.cancelled() => {
                    tracing::warn!("Shutdown during startup backup, abandoning it")
                }
            }
        })
    };

    let app = routes::create_router(Arc::new(AppState::new(scheduler.clone(), catalog)));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();
    if let Err(e) = startup.await {
        tracing::warn!("Startup backup task failed: {}", e);
    }

    if let Err(e) = scheduler.stop().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }

    tracing::info!("Server stopped");
    Ok(())
}
