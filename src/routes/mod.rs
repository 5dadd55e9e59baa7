use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::AppState;
use crate::services::producer::SubmitError;
use crate::services::status::StoreError;

pub mod health;
pub mod metrics;
pub mod posts;
pub mod upload;

/// API routes with body limits applied. Tracing, CORS and compression layers
/// are added by the binary.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/upload", post(upload::upload_post))
        .route("/api/upload-binary", post(upload::upload_binary))
        .route("/api/upload-status/{job_id}", get(upload::upload_status))
        .route("/api/posts", get(posts::list_posts))
        .route("/api/posts/{id}", get(posts::get_post))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}

/// Error body returned by every endpoint.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(_) | SubmitError::NothingStaged => {
                ApiError::BadRequest(err.to_string())
            }
            SubmitError::Persistence(_) | SubmitError::Publish(_) | SubmitError::Envelope(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Status store query failed");
        ApiError::Internal("Failed to query database".to_string())
    }
}
