use crate::middleware::workspace::WorkspaceId;
use crate::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use workbench_core::domain::Collection;
use workbench_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CollectionBody {
    pub parent_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderBody {
    pub orders: Vec<ReorderEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderEntry {
    pub id: i64,
    #[serde(rename = "sortOrder")]
    pub sort_order: i64,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.list_collections(workspace_id).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.get_collection(id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    Json(body): Json<CollectionBody>,
) -> Result<impl IntoResponse, AppError> {
    let collection = Collection {
        id: 0,
        workspace_id,
        parent_id: body.parent_id,
        name: body.name,
        sort_order: body.sort_order,
        variables: body.variables,
    };
    let created = state.repo.create_collection(collection).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<CollectionBody>,
) -> Result<impl IntoResponse, AppError> {
    let existing = state.repo.get_collection(id).await?;
    let collection = Collection {
        id,
        workspace_id: existing.workspace_id,
        parent_id: body.parent_id,
        name: body.name,
        sort_order: body.sort_order,
        variables: body.variables,
    };
    Ok(Json(state.repo.update_collection(collection).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.delete_collection(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let duplicated = state.repo.duplicate_collection(id).await?;
    Ok((StatusCode::CREATED, Json(duplicated)))
}

pub async fn reorder(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    Json(body): Json<ReorderBody>,
) -> Result<impl IntoResponse, AppError> {
    // Reparent first (if requested), then apply the sort-order pass.
    for entry in &body.orders {
        if let Some(parent_id) = entry.parent_id {
            let mut collection = state.repo.get_collection(entry.id).await?;
            collection.parent_id = Some(parent_id);
            state.repo.update_collection(collection).await?;
        }
    }
    let ordered_ids: Vec<i64> = body.orders.iter().map(|o| o.id).collect();
    state.repo.reorder_collections(workspace_id, &ordered_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}
