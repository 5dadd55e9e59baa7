use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{JobKind, JobStatus, NewJob, StatusRecord, StatusUpdate};
use crate::services::status::{check_update, StatusStore, StoreError};

const RECORD_COLUMNS: &str = "id, kind, title, todo, status, image_urls, error_message, \
                              attempts, created_at, updated_at";

/// [`StatusStore`] over the `upload_jobs` table.
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &PgRow) -> Result<StatusRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let kind: String = row.try_get("kind")?;

    Ok(StatusRecord {
        id: row.try_get("id")?,
        kind: kind
            .parse::<JobKind>()
            .map_err(|_| StoreError::Corrupt(format!("unknown kind '{kind}'")))?,
        title: row.try_get("title")?,
        todo: row.try_get("todo")?,
        status: status
            .parse::<JobStatus>()
            .map_err(|_| StoreError::Corrupt(format!("unknown status '{status}'")))?,
        image_urls: row.try_get("image_urls")?,
        error_message: row.try_get("error_message")?,
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// States a record may be in for `next` to be applied.
fn allowed_sources(next: JobStatus) -> Vec<String> {
    [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ]
    .into_iter()
    .filter(|s| s.can_transition_to(next))
    .map(|s| s.as_ref().to_string())
    .collect()
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn insert_pending(&self, job: &NewJob) -> Result<StatusRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO upload_jobs (id, kind, title, todo, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(job.kind.as_ref())
        .bind(job.title.as_deref())
        .bind(job.todo.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Duplicate(job.id)
            }
            other => StoreError::Database(other),
        })?;

        record_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StatusRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM upload_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn update(&self, id: Uuid, update: StatusUpdate) -> Result<StatusRecord, StoreError> {
        check_update(&update)?;

        let next = update.status();
        let (image_urls, error) = match update {
            StatusUpdate::Processing => (None, None),
            StatusUpdate::Completed { image_urls } => (Some(image_urls), None),
            StatusUpdate::Failed { error } => (None, Some(error)),
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE upload_jobs
            SET status = $2,
                attempts = attempts + CASE WHEN $2 = 'processing' THEN 1 ELSE 0 END,
                image_urls = COALESCE($3, image_urls),
                error_message = CASE WHEN $2 = 'failed' THEN $4 ELSE NULL END,
                updated_at = GREATEST(updated_at, NOW())
            WHERE id = $1 AND status = ANY($5)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(next.as_ref())
        .bind(image_urls)
        .bind(error)
        .bind(allowed_sources(next))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => match self.get(id).await? {
                Some(current) => Err(StoreError::InvalidTransition {
                    id,
                    from: current.status,
                    to: next,
                }),
                None => Err(StoreError::NotFound(id)),
            },
        }
    }

    async fn list_posts(&self, limit: i64) -> Result<Vec<StatusRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM upload_jobs
            WHERE kind = 'post'
            ORDER BY created_at DESC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
