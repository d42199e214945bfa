use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowAction {
    Next,
    Stop,
    Repeat,
    Goto,
}

impl Default for FlowAction {
    fn default() -> Self {
        Self::Next
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Output of running one script (pre or post), either DSL or JavaScript flavour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptResult {
    pub success: bool,
    pub assertions_passed: u32,
    pub assertions_failed: u32,
    pub errors: Vec<String>,
    pub error_details: Vec<ErrorDetail>,
    pub updated_runtime_vars: HashMap<String, String>,
    pub updated_env_vars: HashMap<String, String>,
    pub updated_global_vars: HashMap<String, String>,
    pub updated_collection_vars: HashMap<String, String>,
    pub flow_action: FlowAction,
    pub goto_step_name: Option<String>,
    pub goto_step_order: Option<i64>,
}

impl ScriptResult {
    /// The no-op result for an empty script.
    pub fn noop() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.success = false;
        self.errors.push(message.into());
    }
}
