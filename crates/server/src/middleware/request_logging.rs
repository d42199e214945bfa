use crate::AppState;
use axum::extract::State;
use axum::{extract::Request, middleware::Next, response::Response};
use workbench_core::context::RequestContext;

/// Logs request/response pairs and feeds the metrics counters.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    let ctx = request.extensions().get::<RequestContext>().cloned();
    let request_id = ctx.as_ref().map(|c| c.request_id.clone()).unwrap_or_default();
    let client_ip = ctx
        .as_ref()
        .and_then(|c| c.client_ip.clone())
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(
        request_id = %request_id,
        client_ip = %client_ip,
        method = %method,
        path = %uri,
        "Request received"
    );

    state.metrics.record_request(method.as_str());

    let response = next.run(request).await;

    let elapsed = ctx.map(|c| c.elapsed_ms()).unwrap_or(0);
    let status = response.status().as_u16();
    if status >= 500 {
        state.metrics.record_error();
    }
    state.metrics.record_latency_ms(elapsed);

    tracing::info!(
        request_id = %request_id,
        status = status,
        elapsed_ms = elapsed,
        "Request completed"
    );

    response
}
