use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::job::{JobKind, JobStatus, NewJob, StatusRecord, StatusUpdate};

/// Durable table of job status records, keyed by post or job id.
///
/// Every call is atomic on its own; callers never hold anything across calls.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create the `pending` record for a freshly accepted submission.
    async fn insert_pending(&self, job: &NewJob) -> Result<StatusRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<StatusRecord>, StoreError>;

    /// Apply a consumer-side transition and return the updated record.
    async fn update(&self, id: Uuid, update: StatusUpdate) -> Result<StatusRecord, StoreError>;

    /// Posts, newest first.
    async fn list_posts(&self, limit: i64) -> Result<Vec<StatusRecord>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Reject updates no store may apply regardless of the current state.
pub(crate) fn check_update(update: &StatusUpdate) -> Result<(), StoreError> {
    match update {
        StatusUpdate::Completed { image_urls } if image_urls.is_empty() => {
            Err(StoreError::EmptyResult)
        }
        StatusUpdate::Failed { error } if error.trim().is_empty() => {
            Err(StoreError::MissingError)
        }
        _ => Ok(()),
    }
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<Uuid, StatusRecord>,
    fail_writes: bool,
    history: HashMap<Uuid, Vec<JobStatus>>,
}

/// Status records held in process memory.
#[derive(Default)]
pub struct MemoryStatusStore {
    state: Mutex<MemoryState>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent inserts and updates fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Every status a record has held, in order.
    pub fn history(&self, id: Uuid) -> Vec<JobStatus> {
        self.state.lock().history.get(&id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert_pending(&self, job: &NewJob) -> Result<StatusRecord, StoreError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        if state.records.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }

        let now = Utc::now();
        let record = StatusRecord {
            id: job.id,
            kind: job.kind,
            title: job.title.clone(),
            todo: job.todo.clone(),
            status: JobStatus::Pending,
            image_urls: Vec::new(),
            error_message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(job.id, record.clone());
        state.history.insert(job.id, vec![JobStatus::Pending]);
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self.state.lock().records.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, update: StatusUpdate) -> Result<StatusRecord, StoreError> {
        check_update(&update)?;

        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let next = update.status();
        if !record.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id,
                from: record.status,
                to: next,
            });
        }

        match update {
            StatusUpdate::Processing => {
                record.attempts += 1;
                record.error_message = None;
            }
            StatusUpdate::Completed { image_urls } => {
                record.image_urls = image_urls;
                record.error_message = None;
            }
            StatusUpdate::Failed { error } => record.error_message = Some(error),
        }
        record.status = next;
        record.updated_at = record.updated_at.max(Utc::now());

        let updated = record.clone();
        state.history.entry(id).or_default().push(next);
        Ok(updated)
    }

    async fn list_posts(&self, limit: i64) -> Result<Vec<StatusRecord>, StoreError> {
        let state = self.state.lock();
        let mut posts: Vec<_> = state
            .records
            .values()
            .filter(|r| r.kind == JobKind::Post)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(posts)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Status record not found: {0}")]
    NotFound(Uuid),

    #[error("Status record already exists: {0}")]
    Duplicate(Uuid),

    #[error("Cannot move {id} from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("A completed record needs at least one image URL")]
    EmptyResult,

    #[error("A failed record needs an error message")]
    MissingError,

    #[error("Corrupt status record: {0}")]
    Corrupt(String),

    #[error("Status store unavailable: {0}")]
    Unavailable(String),
}
