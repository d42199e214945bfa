use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;
use workbench_core::domain::{clamp_loop_count, BodyType, FlowStep};
use workbench_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct FlowStepBody {
    pub name: String,
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_body_type", rename = "bodyType")]
    pub body_type: String,
    #[serde(default)]
    pub cookies: String,
    #[serde(default, rename = "extractVars")]
    pub extract_vars: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default, rename = "delayMs")]
    pub delay_ms: u64,
    #[serde(default = "default_loop_count", rename = "loopCount")]
    pub loop_count: i64,
    #[serde(default, rename = "continueOnError")]
    pub continue_on_error: bool,
    #[serde(default, rename = "preScript")]
    pub pre_script: Option<String>,
    #[serde(default, rename = "postScript")]
    pub post_script: Option<String>,
    #[serde(default, rename = "proxyId")]
    pub proxy_id: Option<i64>,
    #[serde(default, rename = "requestId")]
    pub request_id: Option<i64>,
    #[serde(default, rename = "stepOrder")]
    pub step_order: i64,
}

fn default_body_type() -> String {
    "none".to_string()
}

fn default_loop_count() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ReorderBody {
    #[serde(rename = "stepIds")]
    pub step_ids: Vec<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Path(flow_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.list_flow_steps(flow_id).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path((_flow_id, step_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repo.get_flow_step(step_id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(flow_id): Path<i64>,
    Json(body): Json<FlowStepBody>,
) -> Result<impl IntoResponse, AppError> {
    let body_type = BodyType::from_str(&body.body_type).map_err(AppError::BadRequest)?;
    let step = FlowStep {
        id: 0,
        flow_id,
        step_order: body.step_order,
        name: body.name,
        method: body.method,
        url: body.url,
        headers: body.headers,
        body: body.body,
        body_type,
        cookies: body.cookies,
        extract_vars: body.extract_vars,
        condition: body.condition,
        delay_ms: body.delay_ms,
        loop_count: clamp_loop_count(body.loop_count),
        continue_on_error: body.continue_on_error,
        pre_script: body.pre_script,
        post_script: body.post_script,
        proxy_id: body.proxy_id,
        request_id: body.request_id,
    };
    let created = state.repo.create_flow_step(step).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path((flow_id, step_id)): Path<(i64, i64)>,
    Json(body): Json<FlowStepBody>,
) -> Result<impl IntoResponse, AppError> {
    let body_type = BodyType::from_str(&body.body_type).map_err(AppError::BadRequest)?;
    let step = FlowStep {
        id: step_id,
        flow_id,
        step_order: body.step_order,
        name: body.name,
        method: body.method,
        url: body.url,
        headers: body.headers,
        body: body.body,
        body_type,
        cookies: body.cookies,
        extract_vars: body.extract_vars,
        condition: body.condition,
        delay_ms: body.delay_ms,
        loop_count: clamp_loop_count(body.loop_count),
        continue_on_error: body.continue_on_error,
        pre_script: body.pre_script,
        post_script: body.post_script,
        proxy_id: body.proxy_id,
        request_id: body.request_id,
    };
    Ok(Json(state.repo.update_flow_step(step).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((_flow_id, step_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.delete_flow_step(step_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reorder(
    State(state): State<AppState>,
    Path(flow_id): Path<i64>,
    Json(body): Json<ReorderBody>,
) -> Result<impl IntoResponse, AppError> {
    state.repo.reorder_flow_steps(flow_id, &body.step_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}
