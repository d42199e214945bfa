use crate::middleware::workspace::WorkspaceId;
use crate::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use workbench_core::domain::Proxy;
use workbench_core::error::AppError;
use workbench_core::proxy::{build_http_client_with_timeout, validate_proxy_url};

#[derive(Debug, Deserialize)]
pub struct ProxyBody {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub is_active: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.list_proxies(workspace_id).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.get_proxy(id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    Json(body): Json<ProxyBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_proxy_url(&body.url).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let proxy = Proxy {
        id: 0,
        workspace_id,
        name: body.name,
        url: body.url,
        is_active: body.is_active,
    };
    let created = state.repo.create_proxy(proxy).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ProxyBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_proxy_url(&body.url).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let existing = state.repo.get_proxy(id).await?;
    let proxy = Proxy {
        id,
        workspace_id: existing.workspace_id,
        name: body.name,
        url: body.url,
        is_active: existing.is_active,
    };
    Ok(Json(state.repo.update_proxy(proxy).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.delete_proxy(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.activate_proxy(id).await?))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.deactivate_proxy(workspace_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ProxyTestResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Dials `https://www.google.com` through the proxy to smoke-test reachability.
pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.repo.get_proxy(id).await?;
    let client = build_http_client_with_timeout(Some(&proxy.url), 10, 10)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let start = std::time::Instant::now();
    let result = client.get("https://www.google.com").send().await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let result = match result {
        Ok(resp) => ProxyTestResult {
            success: resp.status().is_success(),
            status_code: Some(resp.status().as_u16()),
            duration_ms,
            error: None,
        },
        Err(e) => ProxyTestResult {
            success: false,
            status_code: None,
            duration_ms,
            error: Some(e.to_string()),
        },
    };
    Ok(Json(result))
}
