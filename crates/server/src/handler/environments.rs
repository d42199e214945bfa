use crate::middleware::workspace::WorkspaceId;
use crate::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use workbench_core::domain::Environment;
use workbench_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct EnvironmentBody {
    pub name: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub is_active: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.list_environments(workspace_id).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.get_environment(id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    Json(body): Json<EnvironmentBody>,
) -> Result<impl IntoResponse, AppError> {
    let env = Environment {
        id: 0,
        workspace_id,
        name: body.name,
        variables: body.variables,
        is_active: body.is_active,
    };
    let created = state.repo.create_environment(env).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<EnvironmentBody>,
) -> Result<impl IntoResponse, AppError> {
    let existing = state.repo.get_environment(id).await?;
    let env = Environment {
        id,
        workspace_id: existing.workspace_id,
        name: body.name,
        variables: body.variables,
        is_active: existing.is_active,
    };
    Ok(Json(state.repo.update_environment(env).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.delete_environment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.activate_environment(id).await?))
}
