use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobKind;
use crate::models::upload::PostResponse;
use crate::routes::ApiError;

const LIST_LIMIT: i64 = 100;

/// GET /api/posts
pub async fn list_posts(State(state): State<AppState>) -> Result<Json<Vec<PostResponse>>, ApiError> {
    let posts = state.store.list_posts(LIST_LIMIT).await?;
    Ok(Json(posts.into_iter().map(PostResponse::from).collect()))
}

/// GET /api/posts/{id}
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PostResponse>, ApiError> {
    match state.store.get(id).await? {
        Some(record) if record.kind == JobKind::Post => Ok(Json(record.into())),
        _ => Err(ApiError::NotFound("Post not found".to_string())),
    }
}
