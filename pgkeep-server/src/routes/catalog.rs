use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use pgkeep::artifact::BackupFile;
use pgkeep::utils::format_bytes;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    pub short_id: String,
    pub name: String,
    pub size_bytes: u64,
    pub size_human: String,
    pub mod_time: DateTime<Utc>,
    pub encrypted: bool,
}

impl From<BackupFile> for CatalogEntry {
    fn from(file: BackupFile) -> Self {
        Self {
            size_human: format_bytes(file.size),
            short_id: file.short_id,
            name: file.name,
            size_bytes: file.size,
            mod_time: file.mod_time,
            encrypted: file.encrypted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub source: String,
    pub count: usize,
    pub files: Vec<CatalogEntry>,
    pub timestamp: DateTime<Utc>,
}

/// `local` plus every enabled provider
pub async fn providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.catalog.sources(),
    })
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
) -> Result<Json<CatalogResponse>, AppError> {
    let files: Vec<CatalogEntry> = state
        .catalog
        .list(&source)
        .await?
        .into_iter()
        .map(CatalogEntry::from)
        .collect();

    Ok(Json(CatalogResponse {
        source,
        count: files.len(),
        files,
        timestamp: Utc::now(),
    }))
}
