//! Storage port. `workbench-store` provides the sqlite adapter; the
//! execution core (resolver, executor, flow runner, server handlers) depends
//! only on this trait, never on sqlx directly.

use crate::domain::{
    Collection, Environment, Flow, FlowStep, History, Proxy, Request, UploadedFile, Workspace,
};
use crate::error::AppError;
use async_trait::async_trait;

pub type RepoResult<T> = Result<T, AppError>;

#[async_trait]
pub trait Repository: Send + Sync {
    // Workspaces
    async fn get_workspace(&self, id: i64) -> RepoResult<Workspace>;
    async fn list_workspaces(&self) -> RepoResult<Vec<Workspace>>;
    async fn create_workspace(&self, name: &str) -> RepoResult<Workspace>;
    async fn update_workspace_variables(
        &self,
        id: i64,
        variables: std::collections::HashMap<String, String>,
    ) -> RepoResult<Workspace>;
    async fn delete_workspace(&self, id: i64) -> RepoResult<()>;

    // Collections
    async fn get_collection(&self, id: i64) -> RepoResult<Collection>;
    async fn list_collections(&self, workspace_id: i64) -> RepoResult<Vec<Collection>>;
    async fn create_collection(&self, collection: Collection) -> RepoResult<Collection>;
    async fn update_collection(&self, collection: Collection) -> RepoResult<Collection>;
    async fn delete_collection(&self, id: i64) -> RepoResult<()>;
    async fn reorder_collections(&self, workspace_id: i64, ordered_ids: &[i64]) -> RepoResult<()>;
    async fn duplicate_collection(&self, id: i64) -> RepoResult<Collection>;

    // Requests
    async fn get_request(&self, id: i64) -> RepoResult<Request>;
    async fn list_requests(&self, workspace_id: i64) -> RepoResult<Vec<Request>>;
    async fn create_request(&self, request: Request) -> RepoResult<Request>;
    async fn update_request(&self, request: Request) -> RepoResult<Request>;
    async fn delete_request(&self, id: i64) -> RepoResult<()>;
    async fn duplicate_request(&self, id: i64) -> RepoResult<Request>;

    // Environments
    async fn get_environment(&self, id: i64) -> RepoResult<Environment>;
    async fn list_environments(&self, workspace_id: i64) -> RepoResult<Vec<Environment>>;
    async fn create_environment(&self, env: Environment) -> RepoResult<Environment>;
    async fn update_environment(&self, env: Environment) -> RepoResult<Environment>;
    async fn delete_environment(&self, id: i64) -> RepoResult<()>;
    /// Activates `id`, deactivating every other environment in its workspace.
    async fn activate_environment(&self, id: i64) -> RepoResult<Environment>;
    async fn active_environment(&self, workspace_id: i64) -> RepoResult<Option<Environment>>;

    // Proxies
    async fn get_proxy(&self, id: i64) -> RepoResult<Proxy>;
    async fn list_proxies(&self, workspace_id: i64) -> RepoResult<Vec<Proxy>>;
    async fn create_proxy(&self, proxy: Proxy) -> RepoResult<Proxy>;
    async fn update_proxy(&self, proxy: Proxy) -> RepoResult<Proxy>;
    async fn delete_proxy(&self, id: i64) -> RepoResult<()>;
    async fn activate_proxy(&self, id: i64) -> RepoResult<Proxy>;
    async fn deactivate_proxy(&self, workspace_id: i64) -> RepoResult<()>;
    async fn active_proxy(&self, workspace_id: i64) -> RepoResult<Option<Proxy>>;

    // Flows
    async fn get_flow(&self, id: i64) -> RepoResult<Flow>;
    async fn list_flows(&self, workspace_id: i64) -> RepoResult<Vec<Flow>>;
    async fn create_flow(&self, flow: Flow) -> RepoResult<Flow>;
    async fn update_flow(&self, flow: Flow) -> RepoResult<Flow>;
    async fn delete_flow(&self, id: i64) -> RepoResult<()>;
    async fn duplicate_flow(&self, id: i64) -> RepoResult<Flow>;

    // Flow steps
    async fn get_flow_step(&self, id: i64) -> RepoResult<FlowStep>;
    async fn list_flow_steps(&self, flow_id: i64) -> RepoResult<Vec<FlowStep>>;
    async fn create_flow_step(&self, step: FlowStep) -> RepoResult<FlowStep>;
    async fn update_flow_step(&self, step: FlowStep) -> RepoResult<FlowStep>;
    async fn delete_flow_step(&self, id: i64) -> RepoResult<()>;
    async fn reorder_flow_steps(&self, flow_id: i64, ordered_ids: &[i64]) -> RepoResult<()>;

    // Uploaded files
    async fn get_file(&self, id: i64) -> RepoResult<UploadedFile>;
    async fn create_file(&self, file: UploadedFile) -> RepoResult<UploadedFile>;
    async fn delete_file(&self, id: i64) -> RepoResult<()>;
    /// Every `UploadedFile` row, across all workspaces.
    async fn list_all_files(&self) -> RepoResult<Vec<UploadedFile>>;
    /// Files not referenced by any request/flow-step body, across all workspaces.
    async fn orphaned_files(&self) -> RepoResult<Vec<UploadedFile>>;

    // History
    async fn get_history(&self, id: i64) -> RepoResult<History>;
    async fn create_history(&self, entry: History) -> RepoResult<History>;
    /// Most recent entries first, capped to `limit`.
    async fn list_history(&self, workspace_id: i64, limit: u32) -> RepoResult<Vec<History>>;
    async fn delete_history(&self, id: i64) -> RepoResult<()>;
    async fn clear_history(&self, workspace_id: i64) -> RepoResult<()>;
}
