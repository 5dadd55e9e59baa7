use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::upload::{BinaryUploadResponse, UploadResponse, UploadStatusResponse};
use crate::routes::ApiError;
use crate::services::producer::{BinarySubmission, InputFile, PostSubmission};

/// POST /api/upload accepts a multipart post with `title`, optional `todo` and
/// files under `images` (or `files`). Processing happens in the worker.
pub async fn upload_post(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut title = String::new();
    let mut todo = None;
    let mut images = Vec::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse form: {e}")))?
    {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let read_error = |e: axum::extract::multipart::MultipartError| {
            ApiError::BadRequest(format!("Failed to parse form: {e}"))
        };

        match name.as_deref() {
            Some("title") => title = field.text().await.map_err(read_error)?,
            Some("todo") => todo = Some(field.text().await.map_err(read_error)?),
            Some(target @ ("images" | "files")) => {
                let bytes = field.bytes().await.map_err(read_error)?;
                let input = InputFile {
                    file_name,
                    bytes: bytes.to_vec(),
                };
                if target == "images" {
                    images.push(input);
                } else {
                    files.push(input);
                }
            }
            _ => {}
        }
    }

    let accepted = state
        .producer
        .submit_post(PostSubmission {
            title,
            todo,
            files: if images.is_empty() { files } else { images },
        })
        .await?;

    Ok(Json(UploadResponse {
        message: "Files uploaded and queued for processing".to_string(),
        post_id: accepted.id,
        status: accepted.status,
        file_paths: accepted.inputs.iter().map(ToString::to_string).collect(),
    }))
}

/// POST /api/upload-binary accepts a raw image body; `Content-Type` picks the extension.
pub async fn upload_binary(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BinaryUploadResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let accepted = state
        .producer
        .submit_binary(BinarySubmission {
            content_type,
            body: body.to_vec(),
        })
        .await?;

    Ok(Json(BinaryUploadResponse {
        message: "File uploaded and queued for processing".to_string(),
        job_id: accepted.id,
        status: accepted.status,
    }))
}

/// GET /api/upload-status/{job_id} returns the current status of a post or binary job.
pub async fn upload_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<UploadStatusResponse>, ApiError> {
    let record = state
        .store
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;

    Ok(Json(record.into()))
}
