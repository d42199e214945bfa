use crate::result::{ExecuteOverrides, ExecuteResult};
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use workbench_core::domain::{
    BodyType, FormDataItem, History, ProxySelector, Request, DEFAULT_WORKSPACE_ID,
};
use workbench_core::file_store::FileStore;
use workbench_core::proxy::{build_http_client_with_timeout, validate_proxy_url};
use workbench_core::repo::Repository;
use workbench_core::resolver::{self, BuiltinContext, ScopeStack};

/// Dispatches one request (stored or ad-hoc) over HTTP.
///
/// Never propagates transport errors: a failed dial, timeout, or malformed
/// response folds into `ExecuteResult.error` with `status_code = 0` per the
/// error handling design, so callers always get a value back.
pub struct RequestExecutor {
    repo: Arc<dyn Repository>,
    file_store: Arc<dyn FileStore>,
    connect_timeout_secs: u64,
    request_timeout_secs: u64,
}

enum BodyPayload {
    Bytes(Vec<u8>),
    Multipart(Form),
}

impl RequestExecutor {
    pub fn new(
        repo: Arc<dyn Repository>,
        file_store: Arc<dyn FileStore>,
        connect_timeout_secs: u64,
        request_timeout_secs: u64,
    ) -> Self {
        Self {
            repo,
            file_store,
            connect_timeout_secs,
            request_timeout_secs,
        }
    }

    /// Dispatches a stored request, applying `overrides` over its stored
    /// fields and resolving variables against `runtime_vars` plus the
    /// workspace's active environment, the request's collection chain, and
    /// workspace variables.
    pub async fn execute(
        &self,
        request: &Request,
        runtime_vars: &HashMap<String, String>,
        builtin_ctx: &BuiltinContext,
        overrides: Option<ExecuteOverrides>,
        flow_id: Option<i64>,
    ) -> ExecuteResult {
        let overrides = overrides.unwrap_or_default();

        let method = overrides.method.clone().unwrap_or_else(|| request.method.clone());
        let raw_url = overrides.url.clone().unwrap_or_else(|| request.url.clone());
        let headers_doc = overrides.headers.clone().unwrap_or_else(|| request.headers.clone());
        let body_type = overrides.body_type.unwrap_or(request.body_type);
        let body_template = overrides.body.clone().unwrap_or_else(|| request.body.clone());
        let proxy_selector = overrides
            .proxy_selector
            .unwrap_or_else(|| ProxySelector::from_stored(request.proxy_id));

        let layers = self
            .layered_vars(request.workspace_id, request.collection_id, builtin_ctx)
            .await;
        let scopes = Self::scopes(runtime_vars, &layers);

        let resolved_url = resolver::resolve(&raw_url, &scopes);
        let resolved_headers = resolver::resolve_headers(&headers_doc, &scopes);

        let result = self
            .dispatch(
                request.workspace_id,
                &method,
                &resolved_url,
                resolved_headers.clone(),
                body_type,
                &body_template,
                &scopes,
                proxy_selector,
                &overrides.runtime_files,
            )
            .await;

        self.write_history(
            request.workspace_id,
            Some(request.id),
            flow_id,
            &method,
            &resolved_url,
            &resolved_headers,
            &body_template,
            &result,
        )
        .await;

        result
    }

    /// Bypasses the stored-request lookup; runs the same pipeline against
    /// caller-supplied fields with a non-file body.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_adhoc(
        &self,
        workspace_id: i64,
        method: &str,
        url: &str,
        headers_doc: &str,
        body: &str,
        body_type: BodyType,
        runtime_vars: &HashMap<String, String>,
        builtin_ctx: &BuiltinContext,
        proxy_selector: ProxySelector,
    ) -> ExecuteResult {
        let layers = self.layered_vars(workspace_id, None, builtin_ctx).await;
        let scopes = Self::scopes(runtime_vars, &layers);

        let resolved_url = resolver::resolve(url, &scopes);
        let resolved_headers = resolver::resolve_headers(headers_doc, &scopes);

        let result = self
            .dispatch(
                workspace_id,
                method,
                &resolved_url,
                resolved_headers.clone(),
                body_type,
                body,
                &scopes,
                proxy_selector,
                &HashMap::new(),
            )
            .await;

        self.write_history(
            workspace_id, None, None, method, &resolved_url, &resolved_headers, body, &result,
        )
        .await;

        result
    }

    /// Same as [`Self::execute_adhoc`] but with a `formdata` body whose file
    /// parts are supplied directly as bytes, keyed by item index.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_adhoc_formdata(
        &self,
        workspace_id: i64,
        method: &str,
        url: &str,
        headers_doc: &str,
        items_json: &str,
        runtime_files: HashMap<usize, (String, Vec<u8>)>,
        runtime_vars: &HashMap<String, String>,
        builtin_ctx: &BuiltinContext,
        proxy_selector: ProxySelector,
    ) -> ExecuteResult {
        let layers = self.layered_vars(workspace_id, None, builtin_ctx).await;
        let scopes = Self::scopes(runtime_vars, &layers);

        let resolved_url = resolver::resolve(url, &scopes);
        let resolved_headers = resolver::resolve_headers(headers_doc, &scopes);

        let result = self
            .dispatch(
                workspace_id,
                method,
                &resolved_url,
                resolved_headers.clone(),
                BodyType::Formdata,
                items_json,
                &scopes,
                proxy_selector,
                &runtime_files,
            )
            .await;

        self.write_history(
            workspace_id,
            None,
            None,
            method,
            &resolved_url,
            &resolved_headers,
            items_json,
            &result,
        )
        .await;

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        workspace_id: i64,
        method: &str,
        resolved_url: &str,
        resolved_headers: Vec<(String, String)>,
        body_type: BodyType,
        body_template: &str,
        scopes: &ScopeStack<'_>,
        proxy_selector: ProxySelector,
        runtime_files: &HashMap<usize, (String, Vec<u8>)>,
    ) -> ExecuteResult {
        let payload = match body_type {
            BodyType::Formdata => {
                self.assemble_multipart(body_template, scopes, runtime_files).await
            }
            _ => BodyPayload::Bytes(resolver::resolve(body_template, scopes).into_bytes()),
        };

        let proxy_url = self.resolve_proxy(workspace_id, proxy_selector).await;
        let proxy_url = match &proxy_url {
            Some(u) if validate_proxy_url(u).is_ok() => Some(u.as_str()),
            _ => None,
        };

        let client = match build_http_client_with_timeout(
            proxy_url,
            self.connect_timeout_secs,
            self.request_timeout_secs,
        ) {
            Ok(c) => c,
            Err(e) => {
                return ExecuteResult::transport_error(
                    resolved_url.to_string(),
                    resolved_headers,
                    format!("failed to build HTTP client: {e}"),
                )
            }
        };

        let Ok(method) = Method::from_bytes(method.to_uppercase().as_bytes()) else {
            return ExecuteResult::transport_error(
                resolved_url.to_string(),
                resolved_headers,
                format!("invalid HTTP method: {method}"),
            );
        };

        let mut builder = client.request(method, resolved_url);
        for (k, v) in &resolved_headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        builder = match payload {
            BodyPayload::Bytes(bytes) => builder.body(bytes),
            BodyPayload::Multipart(form) => builder.multipart(form),
        };

        let start = Instant::now();
        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                return ExecuteResult::transport_error(
                    resolved_url.to_string(),
                    resolved_headers,
                    e.to_string(),
                )
            }
        };

        let status_code = response.status().as_u16();
        let mut headers = Vec::new();
        for name in response.headers().keys() {
            if let Some(value) = response.headers().get(name) {
                headers.push((name.to_string(), value.to_str().unwrap_or("").to_string()));
            }
        }

        let body = match response.bytes().await {
            Ok(b) => String::from_utf8_lossy(&b).into_owned(),
            Err(e) => {
                return ExecuteResult::transport_error(
                    resolved_url.to_string(),
                    resolved_headers,
                    format!("failed to read response body: {e}"),
                )
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        ExecuteResult {
            status_code,
            headers,
            body,
            duration_ms,
            error: None,
            resolved_url: resolved_url.to_string(),
            resolved_headers,
        }
    }

    async fn assemble_multipart(
        &self,
        items_json: &str,
        scopes: &ScopeStack<'_>,
        runtime_files: &HashMap<usize, (String, Vec<u8>)>,
    ) -> BodyPayload {
        let items: Vec<FormDataItem> = serde_json::from_str(items_json).unwrap_or_default();
        let mut form = Form::new();

        for (index, item) in items.into_iter().enumerate() {
            if !item.enabled {
                continue;
            }
            match item.item_type {
                workbench_core::domain::FormDataItemType::Text => {
                    let value = resolver::resolve(&item.value, scopes);
                    form = form.text(item.key.clone(), value);
                }
                workbench_core::domain::FormDataItemType::File => {
                    let (filename, bytes) = if let Some((name, bytes)) = runtime_files.get(&index) {
                        (name.clone(), bytes.clone())
                    } else if let Some(file_id) = item.file_id {
                        match self.repo.get_file(file_id).await {
                            Ok(file) => match self.file_store.get(&file.stored_name).await {
                                Ok(bytes) => (file.original_name, bytes),
                                Err(_) => continue,
                            },
                            Err(_) => continue,
                        }
                    } else {
                        continue;
                    };

                    let part = Part::bytes(bytes)
                        .file_name(filename)
                        .mime_str("application/octet-stream")
                        .unwrap_or_else(|_| Part::bytes(Vec::new()));
                    form = form.part(item.key.clone(), part);
                }
            }
        }

        BodyPayload::Multipart(form)
    }

    async fn resolve_proxy(&self, workspace_id: i64, selector: ProxySelector) -> Option<String> {
        match selector {
            ProxySelector::Direct => None,
            ProxySelector::Inherit => match self.repo.active_proxy(workspace_id).await {
                Ok(Some(proxy)) => Some(proxy.url),
                _ => None,
            },
            ProxySelector::Specific(id) => match self.repo.get_proxy(id).await {
                Ok(proxy) => Some(proxy.url),
                Err(_) => None,
            },
        }
    }

    /// Layers beyond `runtime_vars`, highest priority first: active
    /// environment, the collection chain nearest-first, workspace
    /// variables, then built-in pseudo-variables.
    async fn layered_vars(
        &self,
        workspace_id: i64,
        collection_id: Option<i64>,
        builtin_ctx: &BuiltinContext,
    ) -> Vec<HashMap<String, String>> {
        let mut layers = Vec::new();

        let env_vars = match self.repo.active_environment(workspace_id).await {
            Ok(Some(env)) => env.variables,
            _ => HashMap::new(),
        };
        layers.push(env_vars);

        let mut current = collection_id;
        let mut hops = 0;
        while let Some(id) = current {
            hops += 1;
            if hops > 64 {
                break;
            }
            match self.repo.get_collection(id).await {
                Ok(collection) => {
                    layers.push(collection.variables);
                    current = collection.parent_id;
                }
                Err(_) => break,
            }
        }

        let workspace_vars = match self.repo.get_workspace(workspace_id).await {
            Ok(ws) => ws.variables,
            Err(_) => HashMap::new(),
        };
        layers.push(workspace_vars);
        layers.push(resolver::builtin_vars(builtin_ctx));

        layers
    }

    fn scopes<'a>(
        runtime_vars: &'a HashMap<String, String>,
        layers: &'a [HashMap<String, String>],
    ) -> ScopeStack<'a> {
        let mut stack = ScopeStack::new().push(runtime_vars);
        for layer in layers {
            stack = stack.push(layer);
        }
        stack
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_history(
        &self,
        workspace_id: i64,
        request_id: Option<i64>,
        flow_id: Option<i64>,
        method: &str,
        resolved_url: &str,
        resolved_headers: &[(String, String)],
        request_body: &str,
        result: &ExecuteResult,
    ) {
        let request_headers = serde_json::to_string(
            &resolved_headers.iter().cloned().collect::<HashMap<_, _>>(),
        )
        .unwrap_or_default();
        let response_headers = serde_json::to_string(
            &result.headers.iter().cloned().collect::<HashMap<_, _>>(),
        )
        .unwrap_or_default();

        let entry = History {
            id: 0,
            workspace_id: if workspace_id > 0 { workspace_id } else { DEFAULT_WORKSPACE_ID },
            request_id,
            flow_id,
            method: method.to_string(),
            url: resolved_url.to_string(),
            request_headers,
            request_body: request_body.to_string(),
            status_code: if result.status_code == 0 { None } else { Some(result.status_code) },
            response_headers,
            response_body: result.body.clone(),
            duration_ms: Some(result.duration_ms),
            error: result.error.clone(),
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.repo.create_history(entry).await {
            tracing::warn!(error = %e, "failed to write history entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_fake_http, InMemoryFileStore, InMemoryRepo};

    fn executor() -> RequestExecutor {
        RequestExecutor::new(Arc::new(InMemoryRepo::new()), Arc::new(InMemoryFileStore::default()), 5, 10)
    }

    #[tokio::test]
    async fn test_execute_adhoc_resolves_variables_and_dispatches() {
        let (base_url, hits) = spawn_fake_http(1);
        let exec = executor();
        let mut runtime_vars = HashMap::new();
        runtime_vars.insert("token".to_string(), "secret123".to_string());

        let result = exec
            .execute_adhoc(
                DEFAULT_WORKSPACE_ID,
                "GET",
                &format!("{base_url}/ping"),
                r#"{"X-Token": "{{token}}"}"#,
                "",
                BodyType::None,
                &runtime_vars,
                &BuiltinContext::default(),
                ProxySelector::Direct,
            )
            .await;

        assert_eq!(result.status_code, 200);
        assert!(result.body.contains("\"hit\":1"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(result
            .resolved_headers
            .iter()
            .any(|(k, v)| k == "X-Token" && v == "secret123"));
    }

    #[tokio::test]
    async fn test_execute_adhoc_transport_error_has_zero_status() {
        let exec = executor();
        let runtime_vars = HashMap::new();

        let result = exec
            .execute_adhoc(
                DEFAULT_WORKSPACE_ID,
                "GET",
                "http://127.0.0.1:1",
                "",
                "",
                BodyType::None,
                &runtime_vars,
                &BuiltinContext::default(),
                ProxySelector::Direct,
            )
            .await;

        assert_eq!(result.status_code, 0);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_execute_writes_history_entry() {
        let (base_url, _hits) = spawn_fake_http(1);
        let repo = Arc::new(InMemoryRepo::new());
        let exec = RequestExecutor::new(repo.clone(), Arc::new(InMemoryFileStore::default()), 5, 10);

        let request = Request {
            id: 1,
            workspace_id: DEFAULT_WORKSPACE_ID,
            collection_id: None,
            name: "ping".to_string(),
            method: "GET".to_string(),
            url: format!("{base_url}/ping"),
            headers: "{}".to_string(),
            body: String::new(),
            body_type: BodyType::None,
            cookies: String::new(),
            proxy_id: None,
        };

        let result = exec
            .execute(&request, &HashMap::new(), &BuiltinContext::default(), None, None)
            .await;
        assert_eq!(result.status_code, 200);

        let history = repo.list_history(DEFAULT_WORKSPACE_ID, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].request_id, Some(1));
        assert_eq!(history[0].status_code, Some(200));
    }
}
