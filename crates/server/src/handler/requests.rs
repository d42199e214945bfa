use crate::middleware::workspace::WorkspaceId;
use crate::AppState;
use axum::extract::{Extension, FromRequest, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use workbench_core::domain::{BodyType, ProxySelector, Request as StoredRequest};
use workbench_core::error::AppError;
use workbench_core::resolver::BuiltinContext;
use workbench_executor::ExecuteOverrides;

#[derive(Debug, Deserialize)]
pub struct RequestBody {
    pub collection_id: Option<i64>,
    pub name: String,
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_body_type")]
    pub body_type: String,
    #[serde(default)]
    pub cookies: String,
    #[serde(default, rename = "proxyId")]
    pub proxy_id: Option<i64>,
}

fn default_body_type() -> String {
    "none".to_string()
}

pub async fn list(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.list_requests(workspace_id).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.get_request(id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    Json(body): Json<RequestBody>,
) -> Result<impl IntoResponse, AppError> {
    let body_type = BodyType::from_str(&body.body_type).map_err(AppError::BadRequest)?;
    let request = StoredRequest {
        id: 0,
        workspace_id,
        collection_id: body.collection_id,
        name: body.name,
        method: body.method,
        url: body.url,
        headers: body.headers,
        body: body.body,
        body_type,
        cookies: body.cookies,
        proxy_id: body.proxy_id,
    };
    let created = state.repo.create_request(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RequestBody>,
) -> Result<impl IntoResponse, AppError> {
    let existing = state.repo.get_request(id).await?;
    let body_type = BodyType::from_str(&body.body_type).map_err(AppError::BadRequest)?;
    let request = StoredRequest {
        id,
        workspace_id: existing.workspace_id,
        collection_id: body.collection_id,
        name: body.name,
        method: body.method,
        url: body.url,
        headers: body.headers,
        body: body.body,
        body_type,
        cookies: body.cookies,
        proxy_id: body.proxy_id,
    };
    Ok(Json(state.repo.update_request(request).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.delete_request(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let duplicated = state.repo.duplicate_request(id).await?;
    Ok((StatusCode::CREATED, Json(duplicated)))
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteMetadata {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default, rename = "bodyType")]
    body_type: Option<String>,
    #[serde(default, rename = "proxyId")]
    proxy_id: Option<i64>,
    #[serde(default)]
    variables: HashMap<String, String>,
}

impl ExecuteMetadata {
    fn into_overrides(self) -> Result<(ExecuteOverrides, HashMap<String, String>), AppError> {
        let body_type = self
            .body_type
            .map(|s| BodyType::from_str(&s))
            .transpose()
            .map_err(AppError::BadRequest)?;
        let overrides = ExecuteOverrides {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            body_type,
            proxy_selector: self.proxy_id.map(ProxySelector::from_wire),
            runtime_files: HashMap::new(),
        };
        Ok((overrides, self.variables))
    }
}

/// Reads `_metadata` (JSON), `_items` (JSON array of formdata items, becomes
/// the override body), and `file_<i>` parts (file-type items keyed by index)
/// from a multipart-encoded execute request.
async fn read_execute_multipart(
    mut multipart: Multipart,
) -> Result<(ExecuteOverrides, HashMap<String, String>), AppError> {
    let mut metadata = ExecuteMetadata::default();
    let mut runtime_files: HashMap<usize, (String, Vec<u8>)> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "_metadata" {
            let text = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
            metadata = serde_json::from_str(&text)?;
        } else if name == "_items" {
            let text = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
            metadata.body_type = Some("formdata".to_string());
            metadata.body = Some(text);
        } else if let Some(idx) = name.strip_prefix("file_").and_then(|s| s.parse::<usize>().ok()) {
            let filename = field.file_name().unwrap_or("file").to_string();
            let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
            runtime_files.insert(idx, (filename, bytes.to_vec()));
        }
    }

    let (mut overrides, runtime_vars) = metadata.into_overrides()?;
    overrides.runtime_files = runtime_files;
    Ok((overrides, runtime_vars))
}

/// Execute a stored request, accepting either a JSON override/variables
/// bundle or a `multipart/form-data` body carrying `_metadata`/`_items`/
/// `file_<i>` parts for formdata execution with file uploads.
pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    req: Request,
) -> Result<impl IntoResponse, AppError> {
    let request = state.repo.get_request(id).await?;

    let (overrides, runtime_vars) = if is_multipart(&req) {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        read_execute_multipart(multipart).await?
    } else {
        let Json(metadata) = Json::<ExecuteMetadata>::from_request(req, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        metadata.into_overrides()?
    };

    let result = state
        .executor
        .execute(&request, &runtime_vars, &BuiltinContext::default(), Some(overrides), None)
        .await;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
struct AdhocMetadata {
    #[serde(default)]
    method: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    headers: String,
    #[serde(default)]
    body: String,
    #[serde(default = "default_body_type", rename = "bodyType")]
    body_type: String,
    #[serde(default, rename = "proxyId")]
    proxy_id: Option<i64>,
    #[serde(default)]
    variables: HashMap<String, String>,
}

async fn read_adhoc_multipart(
    mut multipart: Multipart,
) -> Result<(AdhocMetadata, HashMap<usize, (String, Vec<u8>)>), AppError> {
    let mut metadata = AdhocMetadata::default();
    let mut runtime_files: HashMap<usize, (String, Vec<u8>)> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "_metadata" {
            let text = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
            metadata = serde_json::from_str(&text)?;
        } else if name == "_items" {
            metadata.body_type = "formdata".to_string();
            metadata.body = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
        } else if let Some(idx) = name.strip_prefix("file_").and_then(|s| s.parse::<usize>().ok()) {
            let filename = field.file_name().unwrap_or("file").to_string();
            let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
            runtime_files.insert(idx, (filename, bytes.to_vec()));
        }
    }

    Ok((metadata, runtime_files))
}

/// Ad-hoc execute: no stored request, either JSON or multipart (formdata).
pub async fn execute_adhoc(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    req: Request,
) -> Result<impl IntoResponse, AppError> {
    let multipart_request = is_multipart(&req);

    let (metadata, runtime_files) = if multipart_request {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        read_adhoc_multipart(multipart).await?
    } else {
        let Json(metadata) = Json::<AdhocMetadata>::from_request(req, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        (metadata, HashMap::new())
    };

    let proxy_selector = metadata
        .proxy_id
        .map(ProxySelector::from_wire)
        .unwrap_or(ProxySelector::Inherit);

    let result = if metadata.body_type == "formdata" {
        state
            .executor
            .execute_adhoc_formdata(
                workspace_id,
                &metadata.method,
                &metadata.url,
                &metadata.headers,
                &metadata.body,
                runtime_files,
                &metadata.variables,
                &BuiltinContext::default(),
                proxy_selector,
            )
            .await
    } else {
        let body_type = BodyType::from_str(&metadata.body_type).map_err(AppError::BadRequest)?;
        state
            .executor
            .execute_adhoc(
                workspace_id,
                &metadata.method,
                &metadata.url,
                &metadata.headers,
                &metadata.body,
                body_type,
                &metadata.variables,
                &BuiltinContext::default(),
                proxy_selector,
            )
            .await
    };
    Ok(Json(result))
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}
