use std::collections::HashMap;

/// A snapshot of one outbound request, exposed read-only to scripts as `pm.request`.
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// A snapshot of one HTTP response, exposed to scripts as `pm.response`.
/// Empty for pre-scripts, which run before the request is dispatched.
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub duration_ms: u64,
}

/// A single additional request spawned by `pm.sendRequest`.
#[derive(Debug, Clone)]
pub struct SendRequestSpec {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendRequestOutcome {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub error: Option<String>,
}

/// Everything a script invocation (pre- or post-script) needs from the flow runner.
///
/// `send_request` is synchronous because the embedded interpreter has no concept
/// of awaiting a future; the flow runner supplies a closure that blocks on the
/// outer tokio runtime via `Handle::block_on` and counts invocations against the
/// per-script `pm.sendRequest` limit. It is owned (not borrowed) so the script
/// engine can move it into a `Rc<RefCell<_>>` alongside the rest of its host
/// state without unsafe lifetime games.
pub struct ScriptContext {
    pub runtime_vars: HashMap<String, String>,
    pub env_vars: HashMap<String, String>,
    pub global_vars: HashMap<String, String>,
    pub collection_vars: HashMap<String, String>,
    pub has_collection_context: bool,

    pub flow_name: String,
    pub step_name: String,
    pub step_order: i64,
    pub iteration: u32,
    pub loop_count: u32,

    pub request: RequestSnapshot,
    pub response: Option<ResponseSnapshot>,

    pub max_send_request_calls: u32,
    pub send_request: Box<dyn FnMut(SendRequestSpec) -> SendRequestOutcome>,
}
