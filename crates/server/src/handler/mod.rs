pub mod collections;
pub mod environments;
pub mod files;
pub mod flow_steps;
pub mod flows;
pub mod health;
pub mod history;
pub mod proxies;
pub mod requests;
pub mod workspaces;

use crate::middleware::workspace::WorkspaceId;
use axum::extract::Extension;

/// Pulls the workspace id out of the request extensions, defaulting is
/// already handled by the middleware so this always succeeds.
pub(crate) fn workspace_id(ext: &Extension<WorkspaceId>) -> i64 {
    ext.0.0
}
