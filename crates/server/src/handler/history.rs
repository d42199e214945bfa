use crate::middleware::workspace::WorkspaceId;
use crate::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use workbench_core::error::AppError;

const LIST_LIMIT: u32 = 100;

/// Last 100 entries per workspace, ordered by recency.
pub async fn list(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.list_history(workspace_id, LIST_LIMIT).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.get_history(id).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.delete_history(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
