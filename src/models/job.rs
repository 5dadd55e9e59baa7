use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Lifecycle state of an upload job as seen by pollers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether a record in `self` may be moved to `next`.
    ///
    /// Nothing returns to `Pending`, and a completed record never becomes
    /// failed. Terminal records are revisited when the queue redelivers a
    /// job; a later successful pass may overwrite them.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (_, Pending) => false,
            (Completed, Failed) => false,
            (Pending | Processing, _) => true,
            (Completed | Failed, Processing | Completed) => true,
            (Failed, Failed) => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Which submission path produced a job.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Post,
    Binary,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Durable status record for a post or binary upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRecord {
    pub id: Uuid,
    pub kind: JobKind,
    pub title: Option<String>,
    pub todo: Option<String>,
    pub status: JobStatus,
    pub image_urls: Vec<String>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row written by the producer before the envelope is published.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub title: Option<String>,
    pub todo: Option<String>,
}

impl NewJob {
    pub fn post(id: Uuid, title: impl Into<String>, todo: Option<String>) -> Self {
        Self {
            id,
            kind: JobKind::Post,
            title: Some(title.into()),
            todo,
        }
    }

    pub fn binary(id: Uuid) -> Self {
        Self {
            id,
            kind: JobKind::Binary,
            title: None,
            todo: None,
        }
    }
}

/// A single consumer-side mutation of a status record.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Processing,
    Completed { image_urls: Vec<String> },
    Failed { error: String },
}

impl StatusUpdate {
    pub fn status(&self) -> JobStatus {
        match self {
            StatusUpdate::Processing => JobStatus::Processing,
            StatusUpdate::Completed { .. } => JobStatus::Completed,
            StatusUpdate::Failed { .. } => JobStatus::Failed,
        }
    }
}
