use crate::middleware::workspace::WorkspaceId;
use crate::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use workbench_core::domain::Flow;
use workbench_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct FlowBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct RunBody {
    #[serde(default, rename = "stepIds")]
    pub step_ids: Option<Vec<i64>>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.list_flows(workspace_id).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.get_flow(id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    Json(body): Json<FlowBody>,
) -> Result<impl IntoResponse, AppError> {
    let flow = Flow {
        id: 0,
        workspace_id,
        name: body.name,
        description: body.description,
    };
    let created = state.repo.create_flow(flow).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<FlowBody>,
) -> Result<impl IntoResponse, AppError> {
    let existing = state.repo.get_flow(id).await?;
    let flow = Flow {
        id,
        workspace_id: existing.workspace_id,
        name: body.name,
        description: body.description,
    };
    Ok(Json(state.repo.update_flow(flow).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.delete_flow(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let duplicated = state.repo.duplicate_flow(id).await?;
    Ok((StatusCode::CREATED, Json(duplicated)))
}

/// Runs the flow synchronously and returns the full `FlowResult` document.
/// History rows for each dispatched step are written by the request executor
/// as the run progresses, not by this handler.
pub async fn run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RunBody>,
) -> Result<impl IntoResponse, AppError> {
    // Touch the flow first so a missing id surfaces as 404 rather than a
    // `FlowResult{success:false}` the client would have to parse for that.
    state.repo.get_flow(id).await?;

    let result = state.flow_runner.run_flow(id, body.step_ids).await;
    state.metrics.record_flow_run(result.steps.len() as u64);
    Ok(Json(result))
}
