//! Worker side of the pipeline.
//!
//! Each queue is drained by its own loop, one delivery at a time. For every
//! delivery the staged inputs are compressed, uploaded and cleaned up in the
//! order the envelope lists them, then the status record and the queue are
//! settled:
//!
//! * at least one URL: record `completed`, inputs that failed are removed,
//!   delivery acked
//! * no URL: delivery requeued (binary jobs record `failed` first), or
//!   dead-lettered once a bounded retry policy is exhausted
//! * undecodable envelope: delivery rejected without requeue
//! * redelivery of a completed job: leftover inputs removed, acked untouched

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::envelope::JobEnvelope;
use crate::models::job::{JobKind, JobStatus, StatusUpdate};
use crate::services::blob::{BlobError, BlobHandle, BlobStore};
use crate::services::queue::{Broker, Delivery, QueueError};
use crate::services::status::StatusStore;
use crate::services::transcoder;
use crate::services::uploader::{MediaUploader, UploadError, UploadObject};

/// Pause after the broker itself fails, before asking for the next delivery.
const BROKER_BACKOFF: Duration = Duration::from_secs(1);

/// How many times a failing job is handed back to the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` requeues forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    /// `attempts` is the count recorded by the status store, if known.
    pub fn is_exhausted(&self, attempts: Option<i32>) -> bool {
        match (self.max_attempts, attempts) {
            (Some(max), Some(done)) => i64::from(done) >= i64::from(max),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerSettings {
    /// Leave staged and compressed files in place after a successful upload.
    pub keep_files: bool,
    pub retry: RetryPolicy,
}

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { image_urls: Vec<String> },
    Requeued { error: String },
    DeadLettered { error: String },
    AlreadyCompleted,
    Dropped,
}

/// Why a single input produced no URL.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("File not found: {0}")]
    Missing(BlobHandle),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("Error uploading to media host: {0}")]
    Upload(#[from] UploadError),

    #[error("Transcoder task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct Consumer {
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn StatusStore>,
    queue: Arc<dyn Broker>,
    uploader: Arc<dyn MediaUploader>,
    settings: ConsumerSettings,
}

/// Queue receiving envelopes whose retries ran out.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}.dead")
}

impl Consumer {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn StatusStore>,
        queue: Arc<dyn Broker>,
        uploader: Arc<dyn MediaUploader>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            blobs,
            store,
            queue,
            uploader,
            settings,
        }
    }

    /// Drain `J::QUEUE` until `shutdown` fires. Shutdown is only observed
    /// while waiting; a delivery in hand is always processed to the end.
    pub async fn run<J: JobEnvelope>(&self, shutdown: CancellationToken) -> Result<(), QueueError> {
        self.queue.declare(J::QUEUE).await?;
        tracing::info!(queue = J::QUEUE, "Consumer started, waiting for messages");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.queue.next_delivery(J::QUEUE) => next,
            };

            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::error!(queue = J::QUEUE, error = %e, "Failed to receive delivery");
                    tokio::time::sleep(BROKER_BACKOFF).await;
                    continue;
                }
            };

            if let Err(e) = self.handle::<J>(&delivery).await {
                tracing::error!(
                    queue = J::QUEUE,
                    tag = delivery.tag,
                    error = %e,
                    "Failed to settle delivery"
                );
            }
        }

        tracing::info!(queue = J::QUEUE, "Consumer stopped");
        Ok(())
    }

    /// Process one delivery and settle it with the queue.
    pub async fn handle<J: JobEnvelope>(&self, delivery: &Delivery) -> Result<Outcome, QueueError> {
        let kind = J::KIND.as_str();
        let job = match J::decode(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(queue = J::QUEUE, error = %e, "Error decoding message, dropping it");
                self.queue.nack(delivery, false).await?;
                metrics::counter!("upload_jobs_dropped_total", "kind" => kind).increment(1);
                return Ok(Outcome::Dropped);
            }
        };

        let id = job.id();
        let started = Instant::now();
        tracing::info!(id = %id, kind, inputs = job.inputs().len(), "Processing job");

        if self.is_completed(id).await {
            tracing::info!(id = %id, "Job already completed, acknowledging duplicate delivery");
            self.discard_inputs(job.inputs()).await;
            self.queue.ack(delivery).await?;
            return Ok(Outcome::AlreadyCompleted);
        }

        let attempts = match self.store.update(id, StatusUpdate::Processing).await {
            Ok(record) => Some(record.attempts),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Failed to mark job processing");
                None
            }
        };

        let mut image_urls = Vec::with_capacity(job.inputs().len());
        let mut skipped = Vec::new();
        let mut last_error = None;
        for (index, handle) in job.inputs().iter().enumerate() {
            match self.process_input(id, handle).await {
                Ok(url) => {
                    tracing::info!(id = %id, index, url = %url, "Uploaded to media host");
                    image_urls.push(url);
                }
                Err(e) => {
                    tracing::warn!(id = %id, index, handle = %handle, error = %e, "Skipping input");
                    skipped.push(handle.clone());
                    last_error = Some(e);
                }
            }
        }

        metrics::histogram!("upload_job_processing_seconds", "kind" => kind)
            .record(started.elapsed().as_secs_f64());

        if !image_urls.is_empty() {
            let update = StatusUpdate::Completed {
                image_urls: image_urls.clone(),
            };
            if let Err(e) = self.store.update(id, update).await {
                tracing::error!(id = %id, error = %e, "Failed to record completed job");
            }
            // No later pass will retry the skipped inputs once the delivery is acked
            self.discard_inputs(&skipped).await;
            self.queue.ack(delivery).await?;
            metrics::counter!("upload_jobs_completed_total", "kind" => kind).increment(1);
            tracing::info!(id = %id, images = image_urls.len(), "Job completed and acknowledged");
            return Ok(Outcome::Completed { image_urls });
        }

        let mut error = match (job.inputs().len(), last_error) {
            (1, Some(e)) => e.to_string(),
            (n, Some(e)) => format!("no images were successfully processed ({n} inputs): {e}"),
            (_, None) => "no images were successfully processed".to_string(),
        };
        let exhausted = self.settings.retry.is_exhausted(attempts);
        if exhausted {
            error = format!("gave up after {} attempts: {error}", attempts.unwrap_or_default());
        }
        tracing::error!(id = %id, kind, error = %error, "Error processing job");
        metrics::counter!("upload_jobs_failed_total", "kind" => kind).increment(1);

        if J::KIND == JobKind::Binary || exhausted {
            let update = StatusUpdate::Failed {
                error: error.clone(),
            };
            if let Err(e) = self.store.update(id, update).await {
                tracing::error!(id = %id, error = %e, "Failed to record failed job");
            }
        }

        if exhausted {
            let dead = dead_letter_queue(J::QUEUE);
            match self.queue.publish(&dead, &delivery.payload).await {
                Ok(()) => {
                    self.queue.ack(delivery).await?;
                    tracing::warn!(id = %id, queue = %dead, "Job dead-lettered");
                    return Ok(Outcome::DeadLettered { error });
                }
                Err(e) => {
                    tracing::error!(id = %id, error = %e, "Failed to dead-letter job, requeueing");
                }
            }
        }

        self.queue.nack(delivery, true).await?;
        metrics::counter!("upload_jobs_requeued_total", "kind" => kind).increment(1);
        tracing::info!(id = %id, "Job requeued for retry");
        Ok(Outcome::Requeued { error })
    }

    /// A redelivered job whose record is already completed has nothing left
    /// to do. Lookup failures count as not completed.
    async fn is_completed(&self, id: Uuid) -> bool {
        matches!(
            self.store.get(id).await,
            Ok(Some(record)) if record.status == JobStatus::Completed
        )
    }

    /// Remove staged inputs that no pass will read again.
    async fn discard_inputs(&self, handles: &[BlobHandle]) {
        if self.settings.keep_files {
            return;
        }
        for handle in handles {
            self.remove_quietly(handle).await;
        }
    }

    /// Compress and upload one staged input, returning its public URL.
    async fn process_input(&self, id: Uuid, handle: &BlobHandle) -> Result<String, InputError> {
        if !self.blobs.exists(handle).await? {
            return Err(InputError::Missing(handle.clone()));
        }
        let original = self.blobs.read(handle).await?;
        let declared = handle.declared_content_type();

        let (original, compressed) = tokio::task::spawn_blocking(move || {
            let compressed = transcoder::transcode(&original, declared);
            (original, compressed)
        })
        .await?;

        let (object, intermediate) = match compressed {
            Ok(bytes) => {
                tracing::info!(
                    id = %id,
                    handle = %handle,
                    original_bytes = original.len(),
                    compressed_bytes = bytes.len(),
                    "Image compressed"
                );
                let intermediate = match self
                    .blobs
                    .write_derived(handle, transcoder::OUTPUT_SUFFIX, &bytes)
                    .await
                {
                    Ok(derived) => Some(derived),
                    Err(e) => {
                        tracing::warn!(handle = %handle, error = %e, "Failed to store compressed copy");
                        None
                    }
                };
                let object = UploadObject {
                    name: compressed_name(handle),
                    content_type: transcoder::OUTPUT_CONTENT_TYPE.to_string(),
                    bytes,
                };
                (object, intermediate)
            }
            Err(e) => {
                tracing::warn!(
                    id = %id,
                    handle = %handle,
                    error = %e,
                    "Error compressing image, uploading original"
                );
                let object = UploadObject {
                    name: handle.file_name().to_string(),
                    content_type: declared.to_string(),
                    bytes: original,
                };
                (object, None)
            }
        };

        let url = match self.uploader.upload(&object).await {
            Ok(url) => url,
            Err(e) => {
                if let Some(intermediate) = &intermediate {
                    self.remove_quietly(intermediate).await;
                }
                return Err(InputError::Upload(e));
            }
        };

        if self.settings.keep_files {
            tracing::info!(handle = %handle, compressed = ?intermediate, "Keeping files for debugging");
        } else {
            self.remove_quietly(handle).await;
            if let Some(intermediate) = &intermediate {
                self.remove_quietly(intermediate).await;
            }
        }

        Ok(url)
    }

    async fn remove_quietly(&self, handle: &BlobHandle) {
        if let Err(e) = self.blobs.remove(handle).await {
            tracing::warn!(handle = %handle, error = %e, "Failed to remove file");
        }
    }
}

/// Object name for a compressed upload: the input's stem with `.jpg`.
fn compressed_name(handle: &BlobHandle) -> String {
    let file_name = handle.file_name();
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    format!("{stem}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy() {
        assert!(!RetryPolicy::unbounded().is_exhausted(Some(1_000)));
        assert!(!RetryPolicy::bounded(3).is_exhausted(Some(2)));
        assert!(RetryPolicy::bounded(3).is_exhausted(Some(3)));
        // unknown attempt count never exhausts
        assert!(!RetryPolicy::bounded(1).is_exhausted(None));
    }

    #[test]
    fn test_compressed_name() {
        assert_eq!(compressed_name(&BlobHandle::new("/tmp/abc.png")), "abc.jpg");
        assert_eq!(compressed_name(&BlobHandle::new("mem://xyz")), "xyz.jpg");
    }

    #[test]
    fn test_dead_letter_queue_name() {
        assert_eq!(dead_letter_queue("binary_upload"), "binary_upload.dead");
    }
}
