use crate::middleware::workspace::WorkspaceId;
use crate::AppState;
use axum::extract::{Extension, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use workbench_core::domain::UploadedFile;
use workbench_core::error::AppError;

pub async fn upload(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut uploaded: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("file").to_string();
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
        let size = bytes.len() as i64;

        let stored_name = state
            .file_store
            .put(&original_name, &bytes)
            .await
            .map_err(AppError::from)?;

        let file = UploadedFile {
            id: 0,
            workspace_id,
            original_name,
            stored_name,
            content_type,
            size,
        };
        uploaded = Some(state.repo.create_file(file).await?);
    }

    let uploaded = uploaded.ok_or_else(|| AppError::BadRequest("no 'file' part present".to_string()))?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let file = state.repo.get_file(id).await?;
    let bytes = state.file_store.get(&file.stored_name).await.map_err(AppError::from)?;

    let headers = [
        (header::CONTENT_TYPE, file.content_type.clone()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.original_name),
        ),
    ];
    Ok((headers, bytes))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let file = state.repo.get_file(id).await?;
    state.repo.delete_file(id).await?;
    state.file_store.delete(&file.stored_name).await.map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CleanupBody {
    #[serde(default, rename = "dryRun")]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupResult {
    pub unreferenced: Vec<UploadedFile>,
    pub disk_only: Vec<String>,
    pub dry_run: bool,
}

/// Walks `UploadedFile` rows and every formdata `body` column to classify
/// two orphan kinds: DB rows no body references (`unreferenced`) and disk
/// names with no DB row (`disk_only`). Dry-run only reports; otherwise it
/// deletes both the DB row and blob for `unreferenced`, and the blob alone
/// for `disk_only`.
pub async fn cleanup(
    State(state): State<AppState>,
    Json(body): Json<CleanupBody>,
) -> Result<impl IntoResponse, AppError> {
    let unreferenced = state.repo.orphaned_files().await?;

    let all_files = state.repo.list_all_files().await?;
    let known_stored_names: HashSet<String> = all_files.iter().map(|f| f.stored_name.clone()).collect();
    let on_disk = state.file_store.list().await.map_err(AppError::from)?;
    let disk_only: Vec<String> = on_disk
        .into_iter()
        .filter(|name| !known_stored_names.contains(name))
        .collect();

    if !body.dry_run {
        for file in &unreferenced {
            state.repo.delete_file(file.id).await?;
            state.file_store.delete(&file.stored_name).await.map_err(AppError::from)?;
        }
        for name in &disk_only {
            state.file_store.delete(name).await.map_err(AppError::from)?;
        }
    }

    Ok(Json(CleanupResult {
        unreferenced,
        disk_only,
        dry_run: body.dry_run,
    }))
}
