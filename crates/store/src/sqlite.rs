use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr as _;
use workbench_core::domain::{
    Collection, Environment, Flow, FlowStep, History, Proxy, Request, UploadedFile, Workspace,
    DEFAULT_WORKSPACE_ID,
};
use workbench_core::error::AppError;
use workbench_core::repo::{RepoResult, Repository};

use crate::rows::{
    collection_from_row, environment_from_row, flow_from_row, flow_step_from_row,
    history_from_row, proxy_from_row, request_from_row, uploaded_file_from_row, vars_to_json,
    workspace_from_row,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &str) -> Result<Self, anyhow::Error> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Repository for SqliteStore {
    // ── Workspaces ──────────────────────────────────────────────────────

    async fn get_workspace(&self, id: i64) -> RepoResult<Workspace> {
        let row = sqlx::query("SELECT id, name, variables FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(workspace_from_row(&row))
    }

    async fn list_workspaces(&self) -> RepoResult<Vec<Workspace>> {
        let rows = sqlx::query("SELECT id, name, variables FROM workspaces ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(workspace_from_row).collect())
    }

    async fn create_workspace(&self, name: &str) -> RepoResult<Workspace> {
        let id = sqlx::query("INSERT INTO workspaces (name, variables) VALUES (?, '{}')")
            .bind(name)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.get_workspace(id).await
    }

    async fn update_workspace_variables(
        &self,
        id: i64,
        variables: HashMap<String, String>,
    ) -> RepoResult<Workspace> {
        sqlx::query("UPDATE workspaces SET variables = ? WHERE id = ?")
            .bind(vars_to_json(&variables))
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_workspace(id).await
    }

    async fn delete_workspace(&self, id: i64) -> RepoResult<()> {
        if id == DEFAULT_WORKSPACE_ID {
            return Err(AppError::BadRequest(
                "the default workspace cannot be deleted".to_string(),
            ));
        }
        sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Collections ─────────────────────────────────────────────────────

    async fn get_collection(&self, id: i64) -> RepoResult<Collection> {
        let row = sqlx::query(
            "SELECT id, workspace_id, parent_id, name, sort_order, variables FROM collections WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(collection_from_row(&row))
    }

    async fn list_collections(&self, workspace_id: i64) -> RepoResult<Vec<Collection>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, parent_id, name, sort_order, variables FROM collections \
             WHERE workspace_id = ? ORDER BY sort_order, id",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(collection_from_row).collect())
    }

    async fn create_collection(&self, collection: Collection) -> RepoResult<Collection> {
        let id = sqlx::query(
            "INSERT INTO collections (workspace_id, parent_id, name, sort_order, variables) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(collection.workspace_id)
        .bind(collection.parent_id)
        .bind(&collection.name)
        .bind(collection.sort_order)
        .bind(vars_to_json(&collection.variables))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_collection(id).await
    }

    async fn update_collection(&self, collection: Collection) -> RepoResult<Collection> {
        if would_cycle(&self.pool, collection.id, collection.parent_id).await? {
            return Err(AppError::BadRequest(
                "collection move would create a cycle".to_string(),
            ));
        }
        sqlx::query(
            "UPDATE collections SET parent_id = ?, name = ?, sort_order = ?, variables = ? \
             WHERE id = ?",
        )
        .bind(collection.parent_id)
        .bind(&collection.name)
        .bind(collection.sort_order)
        .bind(vars_to_json(&collection.variables))
        .bind(collection.id)
        .execute(&self.pool)
        .await?;
        self.get_collection(collection.id).await
    }

    async fn delete_collection(&self, id: i64) -> RepoResult<()> {
        // Requests in the deleted collection become workspace-scoped orphans
        // (dangling collection_id), not auto-deleted — see spec Open Questions.
        sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reorder_collections(&self, workspace_id: i64, ordered_ids: &[i64]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        for (idx, id) in ordered_ids.iter().enumerate() {
            sqlx::query("UPDATE collections SET sort_order = ? WHERE id = ? AND workspace_id = ?")
                .bind(idx as i64)
                .bind(id)
                .bind(workspace_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn duplicate_collection(&self, id: i64) -> RepoResult<Collection> {
        let mut tx = self.pool.begin().await?;
        let new_id = duplicate_collection_subtree(&mut tx, id, None).await?;
        tx.commit().await?;
        self.get_collection(new_id).await
    }

    // ── Requests ─────────────────────────────────────────────────────────

    async fn get_request(&self, id: i64) -> RepoResult<Request> {
        let row = sqlx::query(
            "SELECT id, workspace_id, collection_id, name, method, url, headers, body, \
             body_type, cookies, proxy_id FROM requests WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(request_from_row(&row))
    }

    async fn list_requests(&self, workspace_id: i64) -> RepoResult<Vec<Request>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, collection_id, name, method, url, headers, body, \
             body_type, cookies, proxy_id FROM requests WHERE workspace_id = ? ORDER BY id",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(request_from_row).collect())
    }

    async fn create_request(&self, request: Request) -> RepoResult<Request> {
        let id = sqlx::query(
            "INSERT INTO requests (workspace_id, collection_id, name, method, url, headers, \
             body, body_type, cookies, proxy_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request.workspace_id)
        .bind(request.collection_id)
        .bind(&request.name)
        .bind(&request.method)
        .bind(&request.url)
        .bind(&request.headers)
        .bind(&request.body)
        .bind(request.body_type.as_str())
        .bind(&request.cookies)
        .bind(request.proxy_id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_request(id).await
    }

    async fn update_request(&self, request: Request) -> RepoResult<Request> {
        sqlx::query(
            "UPDATE requests SET collection_id = ?, name = ?, method = ?, url = ?, headers = ?, \
             body = ?, body_type = ?, cookies = ?, proxy_id = ? WHERE id = ?",
        )
        .bind(request.collection_id)
        .bind(&request.name)
        .bind(&request.method)
        .bind(&request.url)
        .bind(&request.headers)
        .bind(&request.body)
        .bind(request.body_type.as_str())
        .bind(&request.cookies)
        .bind(request.proxy_id)
        .bind(request.id)
        .execute(&self.pool)
        .await?;
        self.get_request(request.id).await
    }

    async fn delete_request(&self, id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM requests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn duplicate_request(&self, id: i64) -> RepoResult<Request> {
        let original = self.get_request(id).await?;
        let mut copy = original;
        copy.name = format!("{} (Copy)", copy.name);
        self.create_request(copy).await
    }

    // ── Environments ─────────────────────────────────────────────────────

    async fn get_environment(&self, id: i64) -> RepoResult<Environment> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, variables, is_active FROM environments WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(environment_from_row(&row))
    }

    async fn list_environments(&self, workspace_id: i64) -> RepoResult<Vec<Environment>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, variables, is_active FROM environments \
             WHERE workspace_id = ? ORDER BY id",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(environment_from_row).collect())
    }

    async fn create_environment(&self, env: Environment) -> RepoResult<Environment> {
        let id = sqlx::query(
            "INSERT INTO environments (workspace_id, name, variables, is_active) \
             VALUES (?, ?, ?, 0)",
        )
        .bind(env.workspace_id)
        .bind(&env.name)
        .bind(vars_to_json(&env.variables))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_environment(id).await
    }

    async fn update_environment(&self, env: Environment) -> RepoResult<Environment> {
        sqlx::query("UPDATE environments SET name = ?, variables = ? WHERE id = ?")
            .bind(&env.name)
            .bind(vars_to_json(&env.variables))
            .bind(env.id)
            .execute(&self.pool)
            .await?;
        self.get_environment(env.id).await
    }

    async fn delete_environment(&self, id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM environments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn activate_environment(&self, id: i64) -> RepoResult<Environment> {
        let env = self.get_environment(id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE environments SET is_active = 0 WHERE workspace_id = ?")
            .bind(env.workspace_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE environments SET is_active = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.get_environment(id).await
    }

    async fn active_environment(&self, workspace_id: i64) -> RepoResult<Option<Environment>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, variables, is_active FROM environments \
             WHERE workspace_id = ? AND is_active = 1 LIMIT 1",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(environment_from_row))
    }

    // ── Proxies ──────────────────────────────────────────────────────────

    async fn get_proxy(&self, id: i64) -> RepoResult<Proxy> {
        let row = sqlx::query("SELECT id, workspace_id, name, url, is_active FROM proxies WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(proxy_from_row(&row))
    }

    async fn list_proxies(&self, workspace_id: i64) -> RepoResult<Vec<Proxy>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, url, is_active FROM proxies \
             WHERE workspace_id = ? ORDER BY id",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(proxy_from_row).collect())
    }

    async fn create_proxy(&self, proxy: Proxy) -> RepoResult<Proxy> {
        let id = sqlx::query("INSERT INTO proxies (workspace_id, name, url, is_active) VALUES (?, ?, ?, 0)")
            .bind(proxy.workspace_id)
            .bind(&proxy.name)
            .bind(&proxy.url)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.get_proxy(id).await
    }

    async fn update_proxy(&self, proxy: Proxy) -> RepoResult<Proxy> {
        sqlx::query("UPDATE proxies SET name = ?, url = ? WHERE id = ?")
            .bind(&proxy.name)
            .bind(&proxy.url)
            .bind(proxy.id)
            .execute(&self.pool)
            .await?;
        self.get_proxy(proxy.id).await
    }

    async fn delete_proxy(&self, id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM proxies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn activate_proxy(&self, id: i64) -> RepoResult<Proxy> {
        let proxy = self.get_proxy(id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE proxies SET is_active = 0 WHERE workspace_id = ?")
            .bind(proxy.workspace_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE proxies SET is_active = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.get_proxy(id).await
    }

    async fn deactivate_proxy(&self, workspace_id: i64) -> RepoResult<()> {
        sqlx::query("UPDATE proxies SET is_active = 0 WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_proxy(&self, workspace_id: i64) -> RepoResult<Option<Proxy>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, url, is_active FROM proxies \
             WHERE workspace_id = ? AND is_active = 1 LIMIT 1",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(proxy_from_row))
    }

    // ── Flows ────────────────────────────────────────────────────────────

    async fn get_flow(&self, id: i64) -> RepoResult<Flow> {
        let row = sqlx::query("SELECT id, workspace_id, name, description FROM flows WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(flow_from_row(&row))
    }

    async fn list_flows(&self, workspace_id: i64) -> RepoResult<Vec<Flow>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, description FROM flows WHERE workspace_id = ? ORDER BY id",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(flow_from_row).collect())
    }

    async fn create_flow(&self, flow: Flow) -> RepoResult<Flow> {
        let id = sqlx::query("INSERT INTO flows (workspace_id, name, description) VALUES (?, ?, ?)")
            .bind(flow.workspace_id)
            .bind(&flow.name)
            .bind(&flow.description)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.get_flow(id).await
    }

    async fn update_flow(&self, flow: Flow) -> RepoResult<Flow> {
        sqlx::query("UPDATE flows SET name = ?, description = ? WHERE id = ?")
            .bind(&flow.name)
            .bind(&flow.description)
            .bind(flow.id)
            .execute(&self.pool)
            .await?;
        self.get_flow(flow.id).await
    }

    async fn delete_flow(&self, id: i64) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM flow_steps WHERE flow_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn duplicate_flow(&self, id: i64) -> RepoResult<Flow> {
        let original = self.get_flow(id).await?;
        let steps = self.list_flow_steps(id).await?;

        let mut tx = self.pool.begin().await?;
        let new_flow_id = sqlx::query(
            "INSERT INTO flows (workspace_id, name, description) VALUES (?, ?, ?)",
        )
        .bind(original.workspace_id)
        .bind(format!("{} (Copy)", original.name))
        .bind(&original.description)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for step in steps {
            sqlx::query(
                "INSERT INTO flow_steps (flow_id, step_order, name, method, url, headers, body, \
                 body_type, cookies, extract_vars, condition, delay_ms, loop_count, \
                 continue_on_error, pre_script, post_script, proxy_id, request_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(new_flow_id)
            .bind(step.step_order)
            .bind(&step.name)
            .bind(&step.method)
            .bind(&step.url)
            .bind(&step.headers)
            .bind(&step.body)
            .bind(step.body_type.as_str())
            .bind(&step.cookies)
            .bind(&step.extract_vars)
            .bind(&step.condition)
            .bind(step.delay_ms as i64)
            .bind(step.loop_count as i64)
            .bind(step.continue_on_error)
            .bind(&step.pre_script)
            .bind(&step.post_script)
            .bind(step.proxy_id)
            .bind(step.request_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.get_flow(new_flow_id).await
    }

    // ── Flow steps ───────────────────────────────────────────────────────

    async fn get_flow_step(&self, id: i64) -> RepoResult<FlowStep> {
        let row = sqlx::query(
            "SELECT id, flow_id, step_order, name, method, url, headers, body, body_type, \
             cookies, extract_vars, condition, delay_ms, loop_count, continue_on_error, \
             pre_script, post_script, proxy_id, request_id FROM flow_steps WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(flow_step_from_row(&row))
    }

    async fn list_flow_steps(&self, flow_id: i64) -> RepoResult<Vec<FlowStep>> {
        let rows = sqlx::query(
            "SELECT id, flow_id, step_order, name, method, url, headers, body, body_type, \
             cookies, extract_vars, condition, delay_ms, loop_count, continue_on_error, \
             pre_script, post_script, proxy_id, request_id FROM flow_steps \
             WHERE flow_id = ? ORDER BY step_order, id",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(flow_step_from_row).collect())
    }

    async fn create_flow_step(&self, step: FlowStep) -> RepoResult<FlowStep> {
        let id = sqlx::query(
            "INSERT INTO flow_steps (flow_id, step_order, name, method, url, headers, body, \
             body_type, cookies, extract_vars, condition, delay_ms, loop_count, \
             continue_on_error, pre_script, post_script, proxy_id, request_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(step.flow_id)
        .bind(step.step_order)
        .bind(&step.name)
        .bind(&step.method)
        .bind(&step.url)
        .bind(&step.headers)
        .bind(&step.body)
        .bind(step.body_type.as_str())
        .bind(&step.cookies)
        .bind(&step.extract_vars)
        .bind(&step.condition)
        .bind(step.delay_ms as i64)
        .bind(workbench_core::domain::clamp_loop_count(step.loop_count as i64) as i64)
        .bind(step.continue_on_error)
        .bind(&step.pre_script)
        .bind(&step.post_script)
        .bind(step.proxy_id)
        .bind(step.request_id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_flow_step(id).await
    }

    async fn update_flow_step(&self, step: FlowStep) -> RepoResult<FlowStep> {
        sqlx::query(
            "UPDATE flow_steps SET step_order = ?, name = ?, method = ?, url = ?, headers = ?, \
             body = ?, body_type = ?, cookies = ?, extract_vars = ?, condition = ?, \
             delay_ms = ?, loop_count = ?, continue_on_error = ?, pre_script = ?, \
             post_script = ?, proxy_id = ?, request_id = ? WHERE id = ?",
        )
        .bind(step.step_order)
        .bind(&step.name)
        .bind(&step.method)
        .bind(&step.url)
        .bind(&step.headers)
        .bind(&step.body)
        .bind(step.body_type.as_str())
        .bind(&step.cookies)
        .bind(&step.extract_vars)
        .bind(&step.condition)
        .bind(step.delay_ms as i64)
        .bind(workbench_core::domain::clamp_loop_count(step.loop_count as i64) as i64)
        .bind(step.continue_on_error)
        .bind(&step.pre_script)
        .bind(&step.post_script)
        .bind(step.proxy_id)
        .bind(step.request_id)
        .bind(step.id)
        .execute(&self.pool)
        .await?;
        self.get_flow_step(step.id).await
    }

    async fn delete_flow_step(&self, id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM flow_steps WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reorder_flow_steps(&self, flow_id: i64, ordered_ids: &[i64]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        for (idx, id) in ordered_ids.iter().enumerate() {
            sqlx::query("UPDATE flow_steps SET step_order = ? WHERE id = ? AND flow_id = ?")
                .bind(idx as i64)
                .bind(id)
                .bind(flow_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ── Files ────────────────────────────────────────────────────────────

    async fn get_file(&self, id: i64) -> RepoResult<UploadedFile> {
        let row = sqlx::query(
            "SELECT id, workspace_id, original_name, stored_name, content_type, size \
             FROM uploaded_files WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(uploaded_file_from_row(&row))
    }

    async fn create_file(&self, file: UploadedFile) -> RepoResult<UploadedFile> {
        let id = sqlx::query(
            "INSERT INTO uploaded_files (workspace_id, original_name, stored_name, \
             content_type, size) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(file.workspace_id)
        .bind(&file.original_name)
        .bind(&file.stored_name)
        .bind(&file.content_type)
        .bind(file.size)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_file(id).await
    }

    async fn delete_file(&self, id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM uploaded_files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_all_files(&self) -> RepoResult<Vec<UploadedFile>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, original_name, stored_name, content_type, size FROM uploaded_files",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(uploaded_file_from_row).collect())
    }

    async fn orphaned_files(&self) -> RepoResult<Vec<UploadedFile>> {
        let all_files = sqlx::query(
            "SELECT id, workspace_id, original_name, stored_name, content_type, size FROM uploaded_files",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut referenced: std::collections::HashSet<i64> = std::collections::HashSet::new();
        for table in ["requests", "flow_steps"] {
            let bodies: Vec<String> = sqlx::query(&format!(
                "SELECT body FROM {table} WHERE body_type = 'formdata'"
            ))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.get::<String, _>("body"))
            .collect();

            for body in bodies {
                if let Ok(items) =
                    serde_json::from_str::<Vec<serde_json::Value>>(&body)
                {
                    for item in items {
                        if let Some(id) = item.get("fileId").and_then(|v| v.as_i64()) {
                            referenced.insert(id);
                        }
                    }
                }
            }
        }

        Ok(all_files
            .iter()
            .map(uploaded_file_from_row)
            .filter(|f| !referenced.contains(&f.id))
            .collect())
    }

    // ── History ──────────────────────────────────────────────────────────

    async fn get_history(&self, id: i64) -> RepoResult<History> {
        let row = sqlx::query(
            "SELECT id, workspace_id, request_id, flow_id, method, url, request_headers, \
             request_body, status_code, response_headers, response_body, duration_ms, error, \
             created_at FROM history WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("history entry".to_string()))?;
        Ok(history_from_row(&row))
    }

    async fn create_history(&self, entry: History) -> RepoResult<History> {
        let row = sqlx::query(
            "INSERT INTO history (workspace_id, request_id, flow_id, method, url, \
             request_headers, request_body, status_code, response_headers, response_body, \
             duration_ms, error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id, workspace_id, request_id, flow_id, method, url, request_headers, \
             request_body, status_code, response_headers, response_body, duration_ms, error, created_at",
        )
        .bind(entry.workspace_id)
        .bind(entry.request_id)
        .bind(entry.flow_id)
        .bind(&entry.method)
        .bind(&entry.url)
        .bind(&entry.request_headers)
        .bind(&entry.request_body)
        .bind(entry.status_code.map(|v| v as i64))
        .bind(&entry.response_headers)
        .bind(&entry.response_body)
        .bind(entry.duration_ms.map(|v| v as i64))
        .bind(&entry.error)
        .fetch_one(&self.pool)
        .await?;
        Ok(history_from_row(&row))
    }

    async fn list_history(&self, workspace_id: i64, limit: u32) -> RepoResult<Vec<History>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, request_id, flow_id, method, url, request_headers, \
             request_body, status_code, response_headers, response_body, duration_ms, error, \
             created_at FROM history WHERE workspace_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(workspace_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(history_from_row).collect())
    }

    async fn delete_history(&self, id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM history WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_history(&self, workspace_id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM history WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Walks a collection's new parent chain to ensure `collection_id` does not
/// appear in it (no cycles on move).
async fn would_cycle(
    pool: &SqlitePool,
    collection_id: i64,
    new_parent_id: Option<i64>,
) -> RepoResult<bool> {
    let mut current = new_parent_id;
    while let Some(id) = current {
        if id == collection_id {
            return Ok(true);
        }
        let row = sqlx::query("SELECT parent_id FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        current = row.and_then(|r| r.get::<Option<i64>, _>("parent_id"));
    }
    Ok(false)
}

fn duplicate_collection_subtree<'a>(
    tx: &'a mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_id: i64,
    new_parent_id: Option<i64>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = RepoResult<i64>> + Send + 'a>> {
    Box::pin(async move {
        let row = sqlx::query(
            "SELECT id, workspace_id, parent_id, name, sort_order, variables FROM collections WHERE id = ?",
        )
        .bind(source_id)
        .fetch_one(&mut **tx)
        .await?;
        let source = collection_from_row(&row);

        let new_name = if new_parent_id.is_none() {
            format!("{} (Copy)", source.name)
        } else {
            source.name.clone()
        };

        let new_id = sqlx::query(
            "INSERT INTO collections (workspace_id, parent_id, name, sort_order, variables) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(source.workspace_id)
        .bind(new_parent_id)
        .bind(&new_name)
        .bind(source.sort_order)
        .bind(vars_to_json(&source.variables))
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

        let request_rows = sqlx::query(
            "SELECT id, workspace_id, collection_id, name, method, url, headers, body, \
             body_type, cookies, proxy_id FROM requests WHERE collection_id = ?",
        )
        .bind(source_id)
        .fetch_all(&mut **tx)
        .await?;
        for r in request_rows.iter().map(request_from_row) {
            sqlx::query(
                "INSERT INTO requests (workspace_id, collection_id, name, method, url, \
                 headers, body, body_type, cookies, proxy_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(r.workspace_id)
            .bind(new_id)
            .bind(&r.name)
            .bind(&r.method)
            .bind(&r.url)
            .bind(&r.headers)
            .bind(&r.body)
            .bind(r.body_type.as_str())
            .bind(&r.cookies)
            .bind(r.proxy_id)
            .execute(&mut **tx)
            .await?;
        }

        let child_ids: Vec<i64> = sqlx::query("SELECT id FROM collections WHERE parent_id = ?")
            .bind(source_id)
            .fetch_all(&mut **tx)
            .await?
            .into_iter()
            .map(|row| row.get("id"))
            .collect();
        for child_id in child_ids {
            duplicate_collection_subtree(tx, child_id, Some(new_id)).await?;
        }

        Ok(new_id)
    })
}
