//! In-memory `Repository`/`FileStore` implementations used only by this
//! crate's own tests, so executor/flow-runner behaviour can be exercised
//! without a real sqlite pool.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use workbench_core::domain::{
    Collection, Environment, Flow, FlowStep, History, Proxy, Request, UploadedFile, Workspace,
    DEFAULT_WORKSPACE_ID,
};
use workbench_core::error::AppError;
use workbench_core::file_store::FileStore;
use workbench_core::repo::{RepoResult, Repository};

#[derive(Default)]
struct Tables {
    next_id: i64,
    workspaces: HashMap<i64, Workspace>,
    collections: HashMap<i64, Collection>,
    requests: HashMap<i64, Request>,
    environments: HashMap<i64, Environment>,
    proxies: HashMap<i64, Proxy>,
    flows: HashMap<i64, Flow>,
    flow_steps: HashMap<i64, FlowStep>,
    files: HashMap<i64, UploadedFile>,
    history: HashMap<i64, History>,
}

pub struct InMemoryRepo {
    tables: Mutex<Tables>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        let mut tables = Tables { next_id: 1, ..Default::default() };
        tables.workspaces.insert(
            DEFAULT_WORKSPACE_ID,
            Workspace {
                id: DEFAULT_WORKSPACE_ID,
                name: "Default".to_string(),
                variables: HashMap::new(),
            },
        );
        Self { tables: Mutex::new(tables) }
    }

    fn next_id(&self) -> i64 {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.next_id;
        tables.next_id += 1;
        id
    }

    pub fn insert_flow(&self, flow: Flow) -> Flow {
        let mut tables = self.tables.lock().unwrap();
        tables.flows.insert(flow.id, flow.clone());
        flow
    }

    pub fn insert_flow_step(&self, step: FlowStep) -> FlowStep {
        let mut tables = self.tables.lock().unwrap();
        tables.flow_steps.insert(step.id, step.clone());
        step
    }
}

#[async_trait]
impl Repository for InMemoryRepo {
    async fn get_workspace(&self, id: i64) -> RepoResult<Workspace> {
        self.tables.lock().unwrap().workspaces.get(&id).cloned().ok_or(AppError::NotFound("workspace".into()))
    }
    async fn list_workspaces(&self) -> RepoResult<Vec<Workspace>> {
        Ok(self.tables.lock().unwrap().workspaces.values().cloned().collect())
    }
    async fn create_workspace(&self, name: &str) -> RepoResult<Workspace> {
        let id = self.next_id();
        let ws = Workspace { id, name: name.to_string(), variables: HashMap::new() };
        self.tables.lock().unwrap().workspaces.insert(id, ws.clone());
        Ok(ws)
    }
    async fn update_workspace_variables(&self, id: i64, variables: HashMap<String, String>) -> RepoResult<Workspace> {
        let mut tables = self.tables.lock().unwrap();
        let ws = tables.workspaces.get_mut(&id).ok_or(AppError::NotFound("workspace".into()))?;
        ws.variables = variables;
        Ok(ws.clone())
    }
    async fn delete_workspace(&self, id: i64) -> RepoResult<()> {
        if id == DEFAULT_WORKSPACE_ID {
            return Err(AppError::BadRequest("cannot delete default workspace".into()));
        }
        self.tables.lock().unwrap().workspaces.remove(&id);
        Ok(())
    }

    async fn get_collection(&self, id: i64) -> RepoResult<Collection> {
        self.tables.lock().unwrap().collections.get(&id).cloned().ok_or(AppError::NotFound("collection".into()))
    }
    async fn list_collections(&self, workspace_id: i64) -> RepoResult<Vec<Collection>> {
        Ok(self.tables.lock().unwrap().collections.values().filter(|c| c.workspace_id == workspace_id).cloned().collect())
    }
    async fn create_collection(&self, mut collection: Collection) -> RepoResult<Collection> {
        let id = self.next_id();
        collection.id = id;
        self.tables.lock().unwrap().collections.insert(id, collection.clone());
        Ok(collection)
    }
    async fn update_collection(&self, collection: Collection) -> RepoResult<Collection> {
        self.tables.lock().unwrap().collections.insert(collection.id, collection.clone());
        Ok(collection)
    }
    async fn delete_collection(&self, id: i64) -> RepoResult<()> {
        self.tables.lock().unwrap().collections.remove(&id);
        Ok(())
    }
    async fn reorder_collections(&self, _workspace_id: i64, _ordered_ids: &[i64]) -> RepoResult<()> {
        Ok(())
    }
    async fn duplicate_collection(&self, id: i64) -> RepoResult<Collection> {
        let source = self.get_collection(id).await?;
        let new_id = self.next_id();
        let mut copy = source;
        copy.id = new_id;
        copy.name = format!("{} (Copy)", copy.name);
        self.tables.lock().unwrap().collections.insert(new_id, copy.clone());
        Ok(copy)
    }

    async fn get_request(&self, id: i64) -> RepoResult<Request> {
        self.tables.lock().unwrap().requests.get(&id).cloned().ok_or(AppError::NotFound("request".into()))
    }
    async fn list_requests(&self, workspace_id: i64) -> RepoResult<Vec<Request>> {
        Ok(self.tables.lock().unwrap().requests.values().filter(|r| r.workspace_id == workspace_id).cloned().collect())
    }
    async fn create_request(&self, mut request: Request) -> RepoResult<Request> {
        let id = self.next_id();
        request.id = id;
        self.tables.lock().unwrap().requests.insert(id, request.clone());
        Ok(request)
    }
    async fn update_request(&self, request: Request) -> RepoResult<Request> {
        self.tables.lock().unwrap().requests.insert(request.id, request.clone());
        Ok(request)
    }
    async fn delete_request(&self, id: i64) -> RepoResult<()> {
        self.tables.lock().unwrap().requests.remove(&id);
        Ok(())
    }
    async fn duplicate_request(&self, id: i64) -> RepoResult<Request> {
        let source = self.get_request(id).await?;
        let new_id = self.next_id();
        let mut copy = source;
        copy.id = new_id;
        copy.name = format!("{} (Copy)", copy.name);
        self.tables.lock().unwrap().requests.insert(new_id, copy.clone());
        Ok(copy)
    }

    async fn get_environment(&self, id: i64) -> RepoResult<Environment> {
        self.tables.lock().unwrap().environments.get(&id).cloned().ok_or(AppError::NotFound("environment".into()))
    }
    async fn list_environments(&self, workspace_id: i64) -> RepoResult<Vec<Environment>> {
        Ok(self.tables.lock().unwrap().environments.values().filter(|e| e.workspace_id == workspace_id).cloned().collect())
    }
    async fn create_environment(&self, mut env: Environment) -> RepoResult<Environment> {
        let id = self.next_id();
        env.id = id;
        self.tables.lock().unwrap().environments.insert(id, env.clone());
        Ok(env)
    }
    async fn update_environment(&self, env: Environment) -> RepoResult<Environment> {
        self.tables.lock().unwrap().environments.insert(env.id, env.clone());
        Ok(env)
    }
    async fn delete_environment(&self, id: i64) -> RepoResult<()> {
        self.tables.lock().unwrap().environments.remove(&id);
        Ok(())
    }
    async fn activate_environment(&self, id: i64) -> RepoResult<Environment> {
        let mut tables = self.tables.lock().unwrap();
        let workspace_id = tables.environments.get(&id).map(|e| e.workspace_id).ok_or(AppError::NotFound("environment".into()))?;
        for env in tables.environments.values_mut() {
            if env.workspace_id == workspace_id {
                env.is_active = env.id == id;
            }
        }
        Ok(tables.environments.get(&id).cloned().unwrap())
    }
    async fn active_environment(&self, workspace_id: i64) -> RepoResult<Option<Environment>> {
        Ok(self.tables.lock().unwrap().environments.values().find(|e| e.workspace_id == workspace_id && e.is_active).cloned())
    }

    async fn get_proxy(&self, id: i64) -> RepoResult<Proxy> {
        self.tables.lock().unwrap().proxies.get(&id).cloned().ok_or(AppError::NotFound("proxy".into()))
    }
    async fn list_proxies(&self, workspace_id: i64) -> RepoResult<Vec<Proxy>> {
        Ok(self.tables.lock().unwrap().proxies.values().filter(|p| p.workspace_id == workspace_id).cloned().collect())
    }
    async fn create_proxy(&self, mut proxy: Proxy) -> RepoResult<Proxy> {
        let id = self.next_id();
        proxy.id = id;
        self.tables.lock().unwrap().proxies.insert(id, proxy.clone());
        Ok(proxy)
    }
    async fn update_proxy(&self, proxy: Proxy) -> RepoResult<Proxy> {
        self.tables.lock().unwrap().proxies.insert(proxy.id, proxy.clone());
        Ok(proxy)
    }
    async fn delete_proxy(&self, id: i64) -> RepoResult<()> {
        self.tables.lock().unwrap().proxies.remove(&id);
        Ok(())
    }
    async fn activate_proxy(&self, id: i64) -> RepoResult<Proxy> {
        let mut tables = self.tables.lock().unwrap();
        let workspace_id = tables.proxies.get(&id).map(|p| p.workspace_id).ok_or(AppError::NotFound("proxy".into()))?;
        for proxy in tables.proxies.values_mut() {
            if proxy.workspace_id == workspace_id {
                proxy.is_active = proxy.id == id;
            }
        }
        Ok(tables.proxies.get(&id).cloned().unwrap())
    }
    async fn deactivate_proxy(&self, workspace_id: i64) -> RepoResult<()> {
        let mut tables = self.tables.lock().unwrap();
        for proxy in tables.proxies.values_mut() {
            if proxy.workspace_id == workspace_id {
                proxy.is_active = false;
            }
        }
        Ok(())
    }
    async fn active_proxy(&self, workspace_id: i64) -> RepoResult<Option<Proxy>> {
        Ok(self.tables.lock().unwrap().proxies.values().find(|p| p.workspace_id == workspace_id && p.is_active).cloned())
    }

    async fn get_flow(&self, id: i64) -> RepoResult<Flow> {
        self.tables.lock().unwrap().flows.get(&id).cloned().ok_or(AppError::NotFound("flow".into()))
    }
    async fn list_flows(&self, workspace_id: i64) -> RepoResult<Vec<Flow>> {
        Ok(self.tables.lock().unwrap().flows.values().filter(|f| f.workspace_id == workspace_id).cloned().collect())
    }
    async fn create_flow(&self, mut flow: Flow) -> RepoResult<Flow> {
        let id = self.next_id();
        flow.id = id;
        self.tables.lock().unwrap().flows.insert(id, flow.clone());
        Ok(flow)
    }
    async fn update_flow(&self, flow: Flow) -> RepoResult<Flow> {
        self.tables.lock().unwrap().flows.insert(flow.id, flow.clone());
        Ok(flow)
    }
    async fn delete_flow(&self, id: i64) -> RepoResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.flow_steps.retain(|_, s| s.flow_id != id);
        tables.flows.remove(&id);
        Ok(())
    }
    async fn duplicate_flow(&self, id: i64) -> RepoResult<Flow> {
        let source = self.get_flow(id).await?;
        let new_id = self.next_id();
        let mut copy = source;
        copy.id = new_id;
        copy.name = format!("{} (Copy)", copy.name);
        self.tables.lock().unwrap().flows.insert(new_id, copy.clone());
        Ok(copy)
    }

    async fn get_flow_step(&self, id: i64) -> RepoResult<FlowStep> {
        self.tables.lock().unwrap().flow_steps.get(&id).cloned().ok_or(AppError::NotFound("flow step".into()))
    }
    async fn list_flow_steps(&self, flow_id: i64) -> RepoResult<Vec<FlowStep>> {
        let mut steps: Vec<FlowStep> = self.tables.lock().unwrap().flow_steps.values().filter(|s| s.flow_id == flow_id).cloned().collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }
    async fn create_flow_step(&self, mut step: FlowStep) -> RepoResult<FlowStep> {
        let id = self.next_id();
        step.id = id;
        step.loop_count = workbench_core::domain::clamp_loop_count(step.loop_count as i64);
        self.tables.lock().unwrap().flow_steps.insert(id, step.clone());
        Ok(step)
    }
    async fn update_flow_step(&self, step: FlowStep) -> RepoResult<FlowStep> {
        self.tables.lock().unwrap().flow_steps.insert(step.id, step.clone());
        Ok(step)
    }
    async fn delete_flow_step(&self, id: i64) -> RepoResult<()> {
        self.tables.lock().unwrap().flow_steps.remove(&id);
        Ok(())
    }
    async fn reorder_flow_steps(&self, _flow_id: i64, _ordered_ids: &[i64]) -> RepoResult<()> {
        Ok(())
    }

    async fn get_file(&self, id: i64) -> RepoResult<UploadedFile> {
        self.tables.lock().unwrap().files.get(&id).cloned().ok_or(AppError::NotFound("file".into()))
    }
    async fn create_file(&self, mut file: UploadedFile) -> RepoResult<UploadedFile> {
        let id = self.next_id();
        file.id = id;
        self.tables.lock().unwrap().files.insert(id, file.clone());
        Ok(file)
    }
    async fn delete_file(&self, id: i64) -> RepoResult<()> {
        self.tables.lock().unwrap().files.remove(&id);
        Ok(())
    }
    async fn list_all_files(&self) -> RepoResult<Vec<UploadedFile>> {
        Ok(self.tables.lock().unwrap().files.values().cloned().collect())
    }
    async fn orphaned_files(&self) -> RepoResult<Vec<UploadedFile>> {
        Ok(Vec::new())
    }

    async fn get_history(&self, id: i64) -> RepoResult<History> {
        self.tables
            .lock()
            .unwrap()
            .history
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("history entry".to_string()))
    }
    async fn create_history(&self, mut entry: History) -> RepoResult<History> {
        let id = self.next_id();
        entry.id = id;
        self.tables.lock().unwrap().history.insert(id, entry.clone());
        Ok(entry)
    }
    async fn list_history(&self, workspace_id: i64, limit: u32) -> RepoResult<Vec<History>> {
        let mut entries: Vec<History> = self.tables.lock().unwrap().history.values().filter(|h| h.workspace_id == workspace_id).cloned().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit as usize);
        Ok(entries)
    }
    async fn delete_history(&self, id: i64) -> RepoResult<()> {
        self.tables.lock().unwrap().history.remove(&id);
        Ok(())
    }
    async fn clear_history(&self, workspace_id: i64) -> RepoResult<()> {
        self.tables.lock().unwrap().history.retain(|_, h| h.workspace_id != workspace_id);
        Ok(())
    }
}

/// Spawns a background thread accepting up to `max_hits` plain-HTTP
/// connections on `127.0.0.1`, each answered with a small JSON body
/// `{"hit": n}`. Keeps request-executor/flow-runner tests offline and
/// deterministic without pulling in a mock-server crate.
pub fn spawn_fake_http(max_hits: usize) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    std::thread::spawn(move || {
        for _ in 0..max_hits {
            let Ok((mut stream, _)) = listener.accept() else { break };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let hit = counter_clone.fetch_add(1, Ordering::SeqCst) + 1;
            let body = format!(r#"{{"hit":{hit}}}"#);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    });

    (format!("http://127.0.0.1:{port}"), counter)
}

#[derive(Default)]
pub struct InMemoryFileStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn put(&self, original_name: &str, bytes: &[u8]) -> Result<String, anyhow::Error> {
        let stored_name = format!("{}-{original_name}", self.files.lock().unwrap().len());
        self.files.lock().unwrap().insert(stored_name.clone(), bytes.to_vec());
        Ok(stored_name)
    }
    async fn get(&self, stored_name: &str) -> Result<Vec<u8>, anyhow::Error> {
        self.files.lock().unwrap().get(stored_name).cloned().ok_or_else(|| anyhow::anyhow!("not found"))
    }
    async fn delete(&self, stored_name: &str) -> Result<(), anyhow::Error> {
        self.files.lock().unwrap().remove(stored_name);
        Ok(())
    }
    async fn list(&self) -> Result<Vec<String>, anyhow::Error> {
        Ok(self.files.lock().unwrap().keys().cloned().collect())
    }
}
