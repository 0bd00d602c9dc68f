use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pgkeep::utils::errors::CatalogError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    /// Listing a source failed; the message is passed through
    #[error("{0}")]
    Listing(String),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownSource(source) => {
                AppError::NotFound(format!("Unknown source: {}", source))
            }
            other => AppError::Listing(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::Listing(m) => {
                tracing::warn!("Catalog listing failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
