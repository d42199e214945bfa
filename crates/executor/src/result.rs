use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use workbench_core::domain::{BodyType, ProxySelector};

/// Outcome of one dispatched HTTP request. Transport failures populate
/// `error` and leave `status_code` at 0 rather than propagating an error —
/// the executor itself never fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub resolved_url: String,
    pub resolved_headers: Vec<(String, String)>,
}

impl ExecuteResult {
    pub fn transport_error(resolved_url: String, resolved_headers: Vec<(String, String)>, message: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            headers: Vec::new(),
            body: String::new(),
            duration_ms: 0,
            error: Some(message.into()),
            resolved_url,
            resolved_headers,
        }
    }
}

/// A non-empty field wins over the stored request's value. `proxy_selector`
/// and `runtime_files` have no "empty means absent" encoding of their own,
/// so they're optional at the Rust level instead.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOverrides {
    pub method: Option<String>,
    pub url: Option<String>,
    pub headers: Option<String>,
    pub body: Option<String>,
    pub body_type: Option<BodyType>,
    pub proxy_selector: Option<ProxySelector>,
    /// Form-data file parts supplied at call time, keyed by item index,
    /// taking priority over a stored `fileId` for the same index.
    pub runtime_files: HashMap<usize, (String, Vec<u8>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: i64,
    pub step_name: String,
    pub iteration: u32,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub status_code: Option<u16>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub extracted_vars: HashMap<String, String>,
    pub assertions_passed: u32,
    pub assertions_failed: u32,
}

impl StepResult {
    pub fn skipped(step_id: i64, step_name: String, reason: impl Into<String>) -> Self {
        Self {
            step_id,
            step_name,
            iteration: 0,
            skipped: true,
            skip_reason: Some(reason.into()),
            status_code: None,
            duration_ms: None,
            error: None,
            extracted_vars: HashMap::new(),
            assertions_passed: 0,
            assertions_failed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub flow_id: i64,
    pub flow_name: String,
    pub steps: Vec<StepResult>,
    pub total_time_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}
