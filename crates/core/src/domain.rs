//! Entity types shared by the store, executor, and server crates.
//!
//! Storage layout is an external concern (see the `workbench-store` crate);
//! these types describe the semantic shape the execution core reads and
//! writes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_WORKSPACE_ID: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub workspace_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub sort_order: i64,
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    None,
    Text,
    Json,
    Xml,
    Urlencoded,
    Formdata,
}

impl BodyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Text => "text",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Urlencoded => "urlencoded",
            Self::Formdata => "formdata",
        }
    }
}

impl std::str::FromStr for BodyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "urlencoded" => Ok(Self::Urlencoded),
            "formdata" => Ok(Self::Formdata),
            other => Err(format!("unknown body type: {other}")),
        }
    }
}

/// Tri-state proxy selector as it travels over the wire:
/// `-1` → inherit the workspace's active proxy, `0` → direct (ignore active
/// proxy), `n > 0` → use proxy `n`. Stored as `Option<i64>`: `None` means
/// inherit, `Some(0)` means direct, `Some(n)` means the specific proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySelector {
    Inherit,
    Direct,
    Specific(i64),
}

impl ProxySelector {
    pub fn from_wire(v: i64) -> Self {
        match v {
            -1 => Self::Inherit,
            0 => Self::Direct,
            n => Self::Specific(n),
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            Self::Inherit => -1,
            Self::Direct => 0,
            Self::Specific(n) => n,
        }
    }

    pub fn from_stored(v: Option<i64>) -> Self {
        match v {
            None => Self::Inherit,
            Some(0) => Self::Direct,
            Some(n) => Self::Specific(n),
        }
    }

    pub fn to_stored(self) -> Option<i64> {
        match self {
            Self::Inherit => None,
            Self::Direct => Some(0),
            Self::Specific(n) => Some(n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub workspace_id: i64,
    pub collection_id: Option<i64>,
    pub name: String,
    pub method: String,
    pub url: String,
    /// JSON document, legacy `{name: value}` or structured `{name: {value, enabled}}`.
    pub headers: String,
    pub body: String,
    pub body_type: BodyType,
    pub cookies: String,
    pub proxy_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub variables: HashMap<String, String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub url: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStep {
    pub id: i64,
    pub flow_id: i64,
    pub step_order: i64,
    pub name: String,
    pub method: String,
    pub url: String,
    pub headers: String,
    pub body: String,
    pub body_type: BodyType,
    pub cookies: String,
    /// JSON map `name -> jsonpath`.
    pub extract_vars: String,
    pub condition: Option<String>,
    pub delay_ms: u64,
    pub loop_count: u32,
    pub continue_on_error: bool,
    pub pre_script: Option<String>,
    pub post_script: Option<String>,
    pub proxy_id: Option<i64>,
    pub request_id: Option<i64>,
}

impl FlowStep {
    /// `loop_count` is clamped to >= 1 on both write and read.
    pub fn clamped_loop_count(&self) -> u32 {
        self.loop_count.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: i64,
    pub workspace_id: i64,
    pub original_name: String,
    pub stored_name: String,
    pub content_type: String,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub id: i64,
    pub workspace_id: i64,
    pub request_id: Option<i64>,
    pub flow_id: Option<i64>,
    pub method: String,
    pub url: String,
    pub request_headers: String,
    pub request_body: String,
    pub status_code: Option<u16>,
    pub response_headers: String,
    pub response_body: String,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A single item of a `formdata`-typed body, parsed from its JSON array form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDataItem {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type")]
    pub item_type: FormDataItemType,
    pub enabled: bool,
    #[serde(rename = "fileId", default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    #[serde(rename = "fileSize", default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormDataItemType {
    Text,
    File,
}

/// `loop_count` is clamped to >= 1.
pub fn clamp_loop_count(n: i64) -> u32 {
    if n < 1 { 1 } else { n as u32 }
}
