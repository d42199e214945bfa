use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use workbench_core::domain::DEFAULT_WORKSPACE_ID;
use workbench_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CreateWorkspace {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspace {
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let workspaces = state.repo.list_workspaces().await?;
    Ok(Json(workspaces))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let workspace = state.repo.get_workspace(id).await?;
    Ok(Json(workspace))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateWorkspace>,
) -> Result<impl IntoResponse, AppError> {
    let workspace = state.repo.create_workspace(&body.name).await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateWorkspace>,
) -> Result<impl IntoResponse, AppError> {
    let workspace = state.repo.update_workspace_variables(id, body.variables).await?;
    Ok(Json(workspace))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == DEFAULT_WORKSPACE_ID {
        return Err(AppError::BadRequest(
            "the default workspace cannot be deleted".to_string(),
        ));
    }
    state.repo.delete_workspace(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
