use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use pgkeep::scheduler::JobStatus;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running_jobs: usize,
    pub jobs: Vec<JobStatus>,
    pub timestamp: DateTime<Utc>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
    }))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running_jobs: state.scheduler.running_jobs(),
        jobs: state.scheduler.jobs_status().await,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{app, get_json};
    use axum::http::StatusCode;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (status, body) = get_json(app(&dir).await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["uptime_seconds"].as_i64().unwrap() >= 0);
    }

    #[tokio::test]
    async fn test_status_before_scheduler_start() {
        let dir = TempDir::new().unwrap();
        let (status, body) = get_json(app(&dir).await, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running_jobs"], 0);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 0);
        assert!(body["timestamp"].is_string());
    }
}
