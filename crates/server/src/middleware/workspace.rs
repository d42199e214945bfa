use axum::{extract::Request, middleware::Next, response::Response};
use workbench_core::domain::DEFAULT_WORKSPACE_ID;

/// The workspace selected for this request, carried as an axum Extension.
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceId(pub i64);

/// Reads `X-Workspace-ID`, parses it as a positive integer, and defaults to
/// the default workspace on absence or malformed input.
pub async fn workspace_id_middleware(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-workspace-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_WORKSPACE_ID);

    request.extensions_mut().insert(WorkspaceId(id));
    next.run(request).await
}
