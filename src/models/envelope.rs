//! Work items placed on the durable queue.
//!
//! Both envelopes are flat JSON objects. Field names are part of the wire
//! format shared with every producer and worker process, so they must not
//! be renamed.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobKind;
use crate::services::blob::BlobHandle;

/// Queue holding multi-file post jobs.
pub const POST_QUEUE: &str = "image_processing";

/// Queue holding single-file binary jobs.
pub const BINARY_QUEUE: &str = "binary_upload";

/// Multi-file job created by `POST /api/upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostJob {
    pub post_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub todo: String,
    pub file_paths: Vec<BlobHandle>,
    pub timestamp: DateTime<Utc>,
}

/// Single-file job created by `POST /api/upload-binary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryJob {
    pub job_id: Uuid,
    pub file_path: BlobHandle,
    pub timestamp: DateTime<Utc>,
}

/// Common view of an envelope used by the consumer.
pub trait JobEnvelope: Serialize + DeserializeOwned + Send + Sync {
    const QUEUE: &'static str;
    const KIND: JobKind;

    fn id(&self) -> Uuid;

    /// Staged inputs in the order their URLs must be reported.
    fn inputs(&self) -> &[BlobHandle];

    fn check(&self) -> Result<(), EnvelopeError>;

    fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Json)
    }

    fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let job: Self = serde_json::from_slice(payload).map_err(EnvelopeError::Json)?;
        job.check()?;
        Ok(job)
    }
}

impl JobEnvelope for PostJob {
    const QUEUE: &'static str = POST_QUEUE;
    const KIND: JobKind = JobKind::Post;

    fn id(&self) -> Uuid {
        self.post_id
    }

    fn inputs(&self) -> &[BlobHandle] {
        &self.file_paths
    }

    fn check(&self) -> Result<(), EnvelopeError> {
        if self.title.trim().is_empty() {
            return Err(EnvelopeError::Invalid("title is empty"));
        }
        if self.file_paths.is_empty() {
            return Err(EnvelopeError::Invalid("file_paths is empty"));
        }
        Ok(())
    }
}

impl JobEnvelope for BinaryJob {
    const QUEUE: &'static str = BINARY_QUEUE;
    const KIND: JobKind = JobKind::Binary;

    fn id(&self) -> Uuid {
        self.job_id
    }

    fn inputs(&self) -> &[BlobHandle] {
        std::slice::from_ref(&self.file_path)
    }

    fn check(&self) -> Result<(), EnvelopeError> {
        if self.file_path.as_str().is_empty() {
            return Err(EnvelopeError::Invalid("file_path is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid envelope: {0}")]
    Invalid(&'static str),
}
