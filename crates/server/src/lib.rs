pub mod handler;
pub mod middleware;
pub mod ws;

use arc_swap::ArcSwap;
use axum::{Router, middleware as axum_mw};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use workbench_core::config::Config;
use workbench_core::file_store::FileStore;
use workbench_core::metrics::Metrics;
use workbench_core::repo::Repository;
use workbench_executor::{FlowRunner, RequestExecutor};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub repo: Arc<dyn Repository>,
    pub file_store: Arc<dyn FileStore>,
    pub executor: Arc<RequestExecutor>,
    pub flow_runner: Arc<FlowRunner>,
    pub metrics: Arc<Metrics>,
    pub start_time: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit_bytes = state.config.load().max_upload_mb * 1024 * 1024;

    let public_routes = Router::new()
        .route("/healthz", axum::routing::get(handler::health::healthz))
        .route("/metrics", axum::routing::get(handler::health::metrics));

    let workspace_routes = Router::new()
        .route(
            "/api/workspaces",
            axum::routing::get(handler::workspaces::list).post(handler::workspaces::create),
        )
        .route(
            "/api/workspaces/{id}",
            axum::routing::get(handler::workspaces::get)
                .put(handler::workspaces::update)
                .delete(handler::workspaces::delete),
        );

    let collection_routes = Router::new()
        .route(
            "/api/collections",
            axum::routing::get(handler::collections::list).post(handler::collections::create),
        )
        .route(
            "/api/collections/reorder",
            axum::routing::post(handler::collections::reorder),
        )
        .route(
            "/api/collections/{id}",
            axum::routing::get(handler::collections::get)
                .put(handler::collections::update)
                .delete(handler::collections::delete),
        )
        .route(
            "/api/collections/{id}/duplicate",
            axum::routing::post(handler::collections::duplicate),
        );

    let request_routes = Router::new()
        .route(
            "/api/requests",
            axum::routing::get(handler::requests::list).post(handler::requests::create),
        )
        .route(
            "/api/requests/{id}",
            axum::routing::get(handler::requests::get)
                .put(handler::requests::update)
                .delete(handler::requests::delete),
        )
        .route(
            "/api/requests/{id}/duplicate",
            axum::routing::post(handler::requests::duplicate),
        )
        .route(
            "/api/requests/{id}/execute",
            axum::routing::post(handler::requests::execute),
        )
        .route("/api/execute", axum::routing::post(handler::requests::execute_adhoc))
        .layer(RequestBodyLimitLayer::new(body_limit_bytes));

    let environment_routes = Router::new()
        .route(
            "/api/environments",
            axum::routing::get(handler::environments::list).post(handler::environments::create),
        )
        .route(
            "/api/environments/{id}",
            axum::routing::get(handler::environments::get)
                .put(handler::environments::update)
                .delete(handler::environments::delete),
        )
        .route(
            "/api/environments/{id}/activate",
            axum::routing::post(handler::environments::activate),
        );

    let proxy_routes = Router::new()
        .route(
            "/api/proxies",
            axum::routing::get(handler::proxies::list).post(handler::proxies::create),
        )
        .route(
            "/api/proxies/deactivate",
            axum::routing::post(handler::proxies::deactivate),
        )
        .route(
            "/api/proxies/{id}",
            axum::routing::get(handler::proxies::get)
                .put(handler::proxies::update)
                .delete(handler::proxies::delete),
        )
        .route(
            "/api/proxies/{id}/activate",
            axum::routing::post(handler::proxies::activate),
        )
        .route(
            "/api/proxies/{id}/test",
            axum::routing::post(handler::proxies::test),
        );

    let flow_routes = Router::new()
        .route(
            "/api/flows",
            axum::routing::get(handler::flows::list).post(handler::flows::create),
        )
        .route(
            "/api/flows/{id}",
            axum::routing::get(handler::flows::get)
                .put(handler::flows::update)
                .delete(handler::flows::delete),
        )
        .route(
            "/api/flows/{id}/duplicate",
            axum::routing::post(handler::flows::duplicate),
        )
        .route("/api/flows/{id}/run", axum::routing::post(handler::flows::run))
        .route(
            "/api/flows/{id}/steps",
            axum::routing::get(handler::flow_steps::list).post(handler::flow_steps::create),
        )
        .route(
            "/api/flows/{id}/steps/{step_id}",
            axum::routing::get(handler::flow_steps::get)
                .put(handler::flow_steps::update)
                .delete(handler::flow_steps::delete),
        )
        .route(
            "/api/flows/{id}/steps/reorder",
            axum::routing::post(handler::flow_steps::reorder),
        );

    let history_routes = Router::new()
        .route("/api/history", axum::routing::get(handler::history::list))
        .route(
            "/api/history/{id}",
            axum::routing::get(handler::history::get).delete(handler::history::delete),
        );

    let file_routes = Router::new()
        .route("/api/files/upload", axum::routing::post(handler::files::upload))
        .route("/api/files/cleanup", axum::routing::post(handler::files::cleanup))
        .route(
            "/api/files/{id}",
            axum::routing::get(handler::files::get).delete(handler::files::delete),
        )
        .layer(RequestBodyLimitLayer::new(body_limit_bytes));

    let ws_routes = Router::new().route("/ws/relay", axum::routing::get(ws::ws_handler));

    Router::new()
        .merge(public_routes)
        .merge(workspace_routes)
        .merge(collection_routes)
        .merge(request_routes)
        .merge(environment_routes)
        .merge(proxy_routes)
        .merge(flow_routes)
        .merge(history_routes)
        .merge(file_routes)
        .merge(ws_routes)
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::request_logging::request_logging_middleware,
        ))
        .layer(axum_mw::from_fn(
            middleware::request_context::request_context_middleware,
        ))
        .layer(axum_mw::from_fn(
            middleware::workspace::workspace_id_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
