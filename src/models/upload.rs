use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobStatus, StatusRecord};

/// Text fields of a multipart post submission.
#[derive(Debug, Deserialize, Validate)]
pub struct PostForm {
    #[garde(length(min = 1, max = 255), custom(not_blank))]
    pub title: String,

    #[garde(skip)]
    pub todo: Option<String>,
}

/// Same rule the worker applies when it decodes a post envelope.
fn not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

/// Response after a post upload has been queued.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub post_id: Uuid,
    pub status: JobStatus,
    pub file_paths: Vec<String>,
}

/// Response after a binary upload has been queued.
#[derive(Debug, Serialize, Deserialize)]
pub struct BinaryUploadResponse {
    pub message: String,
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Response for polling an upload job.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub image_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<StatusRecord> for UploadStatusResponse {
    fn from(record: StatusRecord) -> Self {
        Self {
            job_id: record.id,
            status: record.status,
            image_url: record.image_urls.first().cloned(),
            image_urls: record.image_urls,
            error: record.error_message,
            updated_at: record.updated_at,
        }
    }
}

/// A post as returned by the listing endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub title: String,
    pub todo: String,
    pub status: JobStatus,
    pub image_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<StatusRecord> for PostResponse {
    fn from(record: StatusRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.unwrap_or_default(),
            todo: record.todo.unwrap_or_default(),
            status: record.status,
            image_urls: record.image_urls,
            created_at: record.created_at,
        }
    }
}
