//! Turns accepted submissions into staged inputs, a `pending` status record
//! and exactly one queued envelope.

use std::sync::Arc;

use chrono::Utc;
use garde::Validate;
use uuid::Uuid;

use crate::models::envelope::{BinaryJob, EnvelopeError, JobEnvelope, PostJob};
use crate::models::job::{JobKind, JobStatus, NewJob};
use crate::models::upload::PostForm;
use crate::services::blob::{
    extension_for_content_type, extension_for_filename, BlobHandle, BlobStore,
};
use crate::services::queue::{Broker, QueueError};
use crate::services::status::{StatusStore, StoreError};

/// One file of a multipart submission.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PostSubmission {
    pub title: String,
    pub todo: Option<String>,
    pub files: Vec<InputFile>,
}

#[derive(Debug, Clone)]
pub struct BinarySubmission {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// What the caller gets back as soon as the job is queued.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub id: Uuid,
    pub status: JobStatus,
    pub inputs: Vec<BlobHandle>,
}

pub struct Producer {
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn StatusStore>,
    queue: Arc<dyn Broker>,
}

impl Producer {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn StatusStore>,
        queue: Arc<dyn Broker>,
    ) -> Self {
        Self {
            blobs,
            store,
            queue,
        }
    }

    /// Accept a multi-file post. Inputs that cannot be staged are skipped.
    pub async fn submit_post(&self, submission: PostSubmission) -> Result<Accepted, SubmitError> {
        let form = PostForm {
            title: submission.title,
            todo: submission.todo.filter(|t| !t.is_empty()),
        };
        form.validate()
            .map_err(|e| SubmitError::Validation(format!("Invalid title: {e}")))?;
        if submission.files.is_empty() {
            return Err(SubmitError::Validation(
                "No images provided. Use 'images' or 'files' field".to_string(),
            ));
        }

        let mut staged = Vec::with_capacity(submission.files.len());
        for file in &submission.files {
            let extension = extension_for_filename(file.file_name.as_deref());
            match self.blobs.stage(&file.bytes, &extension).await {
                Ok(handle) => {
                    tracing::info!(handle = %handle, size = file.bytes.len(), "File staged");
                    staged.push(handle);
                }
                Err(e) => {
                    tracing::warn!(
                        file_name = ?file.file_name,
                        error = %e,
                        "Failed to stage file, skipping"
                    );
                }
            }
        }
        if staged.is_empty() {
            return Err(SubmitError::NothingStaged);
        }

        let post_id = Uuid::new_v4();
        let job = PostJob {
            post_id,
            title: form.title.clone(),
            todo: form.todo.clone().unwrap_or_default(),
            file_paths: staged,
            timestamp: Utc::now(),
        };

        self.enqueue(NewJob::post(post_id, form.title, form.todo), &job)
            .await?;

        metrics::counter!("upload_jobs_submitted_total", "kind" => JobKind::Post.as_str())
            .increment(1);
        tracing::info!(post_id = %post_id, files = job.file_paths.len(), "Post queued");

        Ok(Accepted {
            id: post_id,
            status: JobStatus::Pending,
            inputs: job.file_paths,
        })
    }

    /// Accept a single raw upload.
    pub async fn submit_binary(
        &self,
        submission: BinarySubmission,
    ) -> Result<Accepted, SubmitError> {
        if submission.body.is_empty() {
            return Err(SubmitError::Validation("No file data provided".to_string()));
        }

        let extension = extension_for_content_type(submission.content_type.as_deref());
        let handle = match self.blobs.stage(&submission.body, extension).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to stage binary upload");
                return Err(SubmitError::NothingStaged);
            }
        };
        tracing::info!(handle = %handle, size = submission.body.len(), "Binary file staged");

        let job_id = Uuid::new_v4();
        let job = BinaryJob {
            job_id,
            file_path: handle,
            timestamp: Utc::now(),
        };

        self.enqueue(NewJob::binary(job_id), &job).await?;

        metrics::counter!("upload_jobs_submitted_total", "kind" => JobKind::Binary.as_str())
            .increment(1);
        tracing::info!(job_id = %job_id, "Binary upload queued");

        Ok(Accepted {
            id: job_id,
            status: JobStatus::Pending,
            inputs: vec![job.file_path],
        })
    }

    /// Write the `pending` record, then publish. The record always exists
    /// before the envelope can be delivered.
    async fn enqueue<J: JobEnvelope>(&self, record: NewJob, job: &J) -> Result<(), SubmitError> {
        let payload = match job.encode() {
            Ok(payload) => payload,
            Err(e) => {
                self.discard(job.inputs()).await;
                return Err(SubmitError::Envelope(e));
            }
        };

        if let Err(e) = self.store.insert_pending(&record).await {
            tracing::error!(id = %record.id, error = %e, "Failed to save status record");
            self.discard(job.inputs()).await;
            return Err(SubmitError::Persistence(e));
        }

        if let Err(e) = self.queue.publish(J::QUEUE, &payload).await {
            // The record stays pending; nothing reconciles it here.
            tracing::error!(
                id = %record.id,
                queue = J::QUEUE,
                error = %e,
                "Failed to publish job"
            );
            self.discard(job.inputs()).await;
            return Err(SubmitError::Publish(e));
        }

        Ok(())
    }

    async fn discard(&self, handles: &[BlobHandle]) {
        for handle in handles {
            if let Err(e) = self.blobs.remove(handle).await {
                tracing::warn!(handle = %handle, error = %e, "Failed to remove staged file");
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),

    #[error("No valid files processed")]
    NothingStaged,

    #[error("Failed to save job: {0}")]
    Persistence(#[source] StoreError),

    #[error("Failed to queue job: {0}")]
    Publish(#[source] QueueError),

    #[error("Failed to create job: {0}")]
    Envelope(#[source] EnvelopeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::blob::MemoryBlobStore;
    use crate::services::queue::MemoryQueue;
    use crate::services::status::MemoryStatusStore;
    use crate::models::envelope::{BINARY_QUEUE, POST_QUEUE};

    struct Harness {
        blobs: Arc<MemoryBlobStore>,
        store: Arc<MemoryStatusStore>,
        queue: Arc<MemoryQueue>,
        producer: Producer,
    }

    fn harness() -> Harness {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = Arc::new(MemoryStatusStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let producer = Producer::new(blobs.clone(), store.clone(), queue.clone());
        Harness {
            blobs,
            store,
            queue,
            producer,
        }
    }

    fn file(name: &str) -> InputFile {
        InputFile {
            file_name: Some(name.to_string()),
            bytes: vec![0xFF, 0xD8, 0xFF],
        }
    }

    #[tokio::test]
    async fn test_post_writes_record_before_publishing() {
        let h = harness();
        let accepted = h
            .producer
            .submit_post(PostSubmission {
                title: "Trip".to_string(),
                todo: Some("pack".to_string()),
                files: vec![file("a.jpg"), file("b.png")],
            })
            .await
            .unwrap();

        assert_eq!(accepted.status, JobStatus::Pending);
        let record = h.store.get(accepted.id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.todo.as_deref(), Some("pack"));

        let delivery = h.queue.try_next(POST_QUEUE).unwrap();
        let job = PostJob::decode(&delivery.payload).unwrap();
        assert_eq!(job.post_id, accepted.id);
        assert_eq!(job.file_paths, accepted.inputs);
        assert!(job.file_paths[1].as_str().ends_with(".png"));
    }

    #[tokio::test]
    async fn test_missing_title_rejected_before_staging() {
        let h = harness();
        let err = h
            .producer
            .submit_post(PostSubmission {
                title: String::new(),
                todo: None,
                files: vec![file("a.jpg")],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::Validation(_)));
        assert!(h.blobs.is_empty());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_staging_failure_for_every_file_is_a_client_error() {
        let h = harness();
        h.blobs.fail_staging(true);
        let err = h
            .producer
            .submit_post(PostSubmission {
                title: "t".to_string(),
                todo: None,
                files: vec![file("a.jpg")],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::NothingStaged));
        assert!(h.store.is_empty());
        assert_eq!(h.queue.waiting(POST_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_store_failure_removes_staged_files() {
        let h = harness();
        h.store.fail_writes(true);
        let err = h
            .producer
            .submit_binary(BinarySubmission {
                content_type: Some("image/png".to_string()),
                body: vec![1, 2, 3],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::Persistence(_)));
        assert!(h.blobs.is_empty());
        assert_eq!(h.queue.waiting(BINARY_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_binary_extension_follows_content_type() {
        let h = harness();
        let accepted = h
            .producer
            .submit_binary(BinarySubmission {
                content_type: Some("image/webp".to_string()),
                body: vec![1],
            })
            .await
            .unwrap();
        assert!(accepted.inputs[0].as_str().ends_with(".webp"));
        assert_eq!(h.queue.waiting(BINARY_QUEUE), 1);
    }
}
