pub mod catalog;
pub mod status;

use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/providers", get(catalog::providers))
        .route("/catalog/{source}", get(catalog::list))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pgkeep::catalog::Catalog;
    use pgkeep::coordinator::{Collaborators, Coordinator};
    use pgkeep::lock::RestoreLock;
    use pgkeep::notify::MultiNotifier;
    use pgkeep::process::ToolCommand;
    use pgkeep::remote::RcloneConnector;
    use pgkeep::scheduler::Scheduler;
    use pgkeep::Config;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Router over a temp backup dir. The `broken` provider points at a missing rclone.
    pub async fn app(dir: &TempDir) -> Router {
        let config: Config = serde_json::from_value(json!({
            "database": { "host": "localhost", "username": "postgres", "name": "shop" },
            "local": { "dir": dir.path().join("backups"), "schedule": ["02:00"] },
            "providers": [
                { "name": "broken", "type": "s3", "enabled": true, "path": "pg" },
                { "name": "disabled", "type": "s3", "enabled": false }
            ]
        }))
        .unwrap();

        let connector = Arc::new(RcloneConnector::with_binary(
            dir.path().join("no-rclone").display().to_string(),
        ));
        let catalog = Arc::new(Catalog::from_config(&config, connector.clone()));
        let collaborators = Collaborators {
            lock: Arc::new(RestoreLock::at(dir.path().join("restore.lock"))),
            notifier: Arc::new(MultiNotifier::new(false, false)),
            connector,
            dump: ToolCommand::shell("printf rows"),
        };
        let coordinator = Arc::new(Coordinator::new(config, collaborators).unwrap());
        let scheduler = Arc::new(Scheduler::new(coordinator).await.unwrap());
        create_router(Arc::new(AppState::new(scheduler, catalog)))
    }

    pub async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}
