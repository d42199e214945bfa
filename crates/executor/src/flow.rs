use crate::request::RequestExecutor;
use crate::result::{FlowResult, StepResult};
use jsonpath_rust::JsonPath;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use workbench_core::config::LimitsConfig;
use workbench_core::domain::{FlowStep, Request};
use workbench_core::repo::Repository;
use workbench_core::resolver::{self, BuiltinContext, ScopeStack};
use workbench_script::{FlowAction, RequestSnapshot, ResponseSnapshot, ScriptContext};

/// Drives a flow's steps in `step_order`, honouring conditions, loops, and
/// `goto`/`stop`/`repeat` transfers signalled by post-scripts.
///
/// Iterates by index rather than a Rust iterator so `goto` can jump the
/// cursor arbitrarily; see §4.4 in the design notes.
pub struct FlowRunner {
    repo: Arc<dyn Repository>,
    executor: Arc<RequestExecutor>,
    limits: LimitsConfig,
}

/// What the flattened step/iteration loop does for its next pass.
enum NextMove {
    /// Advance to the next iteration of the current step, or the next step
    /// if this was its last iteration.
    Advance,
    /// Redo the current iteration without incrementing it.
    Repeat,
    /// Jump to a step by index and restart its iteration count.
    Goto(usize),
    /// End the run successfully right now.
    Stop,
}

impl FlowRunner {
    pub fn new(repo: Arc<dyn Repository>, executor: Arc<RequestExecutor>, limits: LimitsConfig) -> Self {
        Self { repo, executor, limits }
    }

    pub async fn run_flow(&self, flow_id: i64, step_ids: Option<Vec<i64>>) -> FlowResult {
        let start = Instant::now();

        let flow = match self.repo.get_flow(flow_id).await {
            Ok(f) => f,
            Err(e) => {
                return FlowResult {
                    flow_id,
                    flow_name: String::new(),
                    steps: Vec::new(),
                    total_time_ms: 0,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };

        let mut steps = match self.repo.list_flow_steps(flow_id).await {
            Ok(s) => s,
            Err(e) => {
                return FlowResult {
                    flow_id,
                    flow_name: flow.name,
                    steps: Vec::new(),
                    total_time_ms: 0,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };
        steps.sort_by_key(|s| s.step_order);

        let allow: Option<HashSet<i64>> = step_ids
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.into_iter().collect());

        let mut name_to_index = HashMap::new();
        let mut order_to_index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            name_to_index.insert(step.name.clone(), i);
            order_to_index.insert(step.step_order, i);
        }

        let mut runtime_vars: HashMap<String, String> = HashMap::new();
        let mut results = Vec::new();
        let mut total_iterations: u32 = 0;
        let mut goto_jumps: u32 = 0;

        let mut idx = 0usize;
        let mut iteration: u32 = 1;

        let finish = |results: Vec<StepResult>, success: bool, error: Option<String>| FlowResult {
            flow_id,
            flow_name: flow.name.clone(),
            steps: results,
            total_time_ms: start.elapsed().as_millis() as u64,
            success,
            error,
        };

        while idx < steps.len() {
            let step = steps[idx].clone();

            if let Some(allow) = &allow {
                if !allow.contains(&step.id) {
                    idx += 1;
                    iteration = 1;
                    continue;
                }
            }

            if step.url.trim().is_empty() {
                results.push(StepResult {
                    step_id: step.id,
                    step_name: step.name.clone(),
                    iteration,
                    skipped: false,
                    skip_reason: None,
                    status_code: None,
                    duration_ms: None,
                    error: Some("step has no URL configured".to_string()),
                    extracted_vars: HashMap::new(),
                    assertions_passed: 0,
                    assertions_failed: 0,
                });
                return finish(results, false, Some("step has no URL configured".to_string()));
            }

            total_iterations += 1;
            if total_iterations > self.limits.max_flow_iterations {
                return finish(results, false, Some("Maximum iteration limit reached".to_string()));
            }

            let loop_count = step.clamped_loop_count();
            runtime_vars.insert("__iteration__".to_string(), iteration.to_string());
            runtime_vars.insert("__loopCount__".to_string(), loop_count.to_string());

            let (collection_id, has_collection_context) = self.step_collection(&step).await;
            let collection_vars = match collection_id {
                Some(id) => match self.repo.get_collection(id).await {
                    Ok(c) => c.variables,
                    Err(_) => HashMap::new(),
                },
                None => HashMap::new(),
            };
            let env_vars = match self.repo.active_environment(flow.workspace_id).await {
                Ok(Some(env)) => env.variables,
                _ => HashMap::new(),
            };
            let global_vars = match self.repo.get_workspace(flow.workspace_id).await {
                Ok(ws) => ws.variables,
                Err(_) => HashMap::new(),
            };

            let builtin_ctx = BuiltinContext {
                iteration: Some(iteration),
                loop_count: Some(loop_count),
                step_name: Some(step.name.clone()),
                step_order: Some(step.step_order),
                flow_name: Some(flow.name.clone()),
                ..Default::default()
            };

            // Pre-script.
            if let Some(pre) = step.pre_script.as_ref().filter(|s| !s.trim().is_empty()) {
                let mut script_ctx = self.script_context(
                    &flow.name,
                    &step,
                    iteration,
                    loop_count,
                    &runtime_vars,
                    &env_vars,
                    &global_vars,
                    &collection_vars,
                    has_collection_context,
                    RequestSnapshot::default(),
                    None,
                    flow.workspace_id,
                );
                let script_result = workbench_script::run(pre, &mut script_ctx);
                merge_runtime(&mut runtime_vars, &script_result.updated_runtime_vars);
                self.persist_pending(flow.workspace_id, collection_id, &script_result).await;

                if script_result.flow_action == FlowAction::Stop {
                    results.push(StepResult {
                        step_id: step.id,
                        step_name: step.name.clone(),
                        iteration,
                        skipped: false,
                        skip_reason: None,
                        status_code: None,
                        duration_ms: None,
                        error: None,
                        extracted_vars: HashMap::new(),
                        assertions_passed: script_result.assertions_passed,
                        assertions_failed: script_result.assertions_failed,
                    });
                    return finish(results, true, None);
                }
            }

            // Condition.
            if let Some(condition) = step.condition.as_ref().filter(|c| !c.trim().is_empty()) {
                let scopes = ScopeStack::new()
                    .push(&runtime_vars)
                    .push(&env_vars)
                    .push(&collection_vars)
                    .push(&global_vars);
                let resolved = resolver::resolve(condition, &scopes);
                // A condition left with an unresolved `{{token}}` skips the step,
                // even though the bare text would otherwise evaluate truthy.
                if resolved.contains("{{") || !workbench_core::expr::evaluate(&resolved) {
                    results.push(StepResult::skipped(step.id, step.name.clone(), "Condition not met"));
                    if iteration < loop_count {
                        iteration += 1;
                    } else {
                        idx += 1;
                        iteration = 1;
                    }
                    continue;
                }
            }

            if step.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
            }

            let synth_request = Request {
                id: step.request_id.unwrap_or(0),
                workspace_id: flow.workspace_id,
                collection_id,
                name: step.name.clone(),
                method: step.method.clone(),
                url: step.url.clone(),
                headers: step.headers.clone(),
                body: step.body.clone(),
                body_type: step.body_type,
                cookies: step.cookies.clone(),
                proxy_id: step.proxy_id,
            };

            let exec_result = self
                .executor
                .execute(&synth_request, &runtime_vars, &builtin_ctx, None, Some(flow_id))
                .await;

            if let Some(err) = exec_result.error.clone() {
                results.push(StepResult {
                    step_id: step.id,
                    step_name: step.name.clone(),
                    iteration,
                    skipped: false,
                    skip_reason: None,
                    status_code: None,
                    duration_ms: Some(exec_result.duration_ms),
                    error: Some(err.clone()),
                    extracted_vars: HashMap::new(),
                    assertions_passed: 0,
                    assertions_failed: 0,
                });
                if !step.continue_on_error {
                    return finish(results, false, Some(err));
                }
                if iteration < loop_count {
                    iteration += 1;
                } else {
                    idx += 1;
                    iteration = 1;
                }
                continue;
            }

            let extracted = self.extract_vars(&step.extract_vars, &exec_result.body);
            for (k, v) in &extracted {
                runtime_vars.insert(k.clone(), v.clone());
            }

            let response_snapshot = ResponseSnapshot {
                status_code: exec_result.status_code,
                headers: exec_result.headers.clone(),
                body: exec_result.body.clone(),
                duration_ms: exec_result.duration_ms,
            };
            let request_snapshot = RequestSnapshot {
                method: step.method.clone(),
                url: exec_result.resolved_url.clone(),
                headers: exec_result.resolved_headers.clone(),
                body: step.body.clone(),
            };

            let mut assertions_passed = 0;
            let mut assertions_failed = 0;
            let mut post_error: Option<String> = None;
            let mut next_move = NextMove::Advance;

            if let Some(post) = step.post_script.as_ref().filter(|s| !s.trim().is_empty()) {
                let mut script_ctx = self.script_context(
                    &flow.name,
                    &step,
                    iteration,
                    loop_count,
                    &runtime_vars,
                    &env_vars,
                    &global_vars,
                    &collection_vars,
                    has_collection_context,
                    request_snapshot,
                    Some(response_snapshot),
                    flow.workspace_id,
                );
                let script_result = workbench_script::run(post, &mut script_ctx);
                merge_runtime(&mut runtime_vars, &script_result.updated_runtime_vars);
                self.persist_pending(flow.workspace_id, collection_id, &script_result).await;
                assertions_passed = script_result.assertions_passed;
                assertions_failed = script_result.assertions_failed;
                if !script_result.success {
                    post_error = script_result.errors.first().cloned();
                }

                next_move = match script_result.flow_action {
                    FlowAction::Next => NextMove::Advance,
                    FlowAction::Stop => NextMove::Stop,
                    FlowAction::Repeat => NextMove::Repeat,
                    FlowAction::Goto => {
                        let target = script_result
                            .goto_step_name
                            .as_ref()
                            .and_then(|n| name_to_index.get(n))
                            .or_else(|| {
                                script_result
                                    .goto_step_order
                                    .and_then(|o| order_to_index.get(&o))
                            })
                            .copied();
                        match target {
                            Some(target_idx) => NextMove::Goto(target_idx),
                            None => NextMove::Advance,
                        }
                    }
                };
            }

            results.push(StepResult {
                step_id: step.id,
                step_name: step.name.clone(),
                iteration,
                skipped: false,
                skip_reason: None,
                status_code: Some(exec_result.status_code),
                duration_ms: Some(exec_result.duration_ms),
                error: post_error.clone(),
                extracted_vars: extracted,
                assertions_passed,
                assertions_failed,
            });

            if post_error.is_some() && !step.continue_on_error {
                return finish(results, false, post_error);
            }

            match next_move {
                NextMove::Stop => return finish(results, true, None),
                NextMove::Repeat => continue,
                NextMove::Goto(target_idx) => {
                    goto_jumps += 1;
                    if goto_jumps > self.limits.max_goto_jumps {
                        return finish(results, false, Some("Maximum goto jump limit reached".to_string()));
                    }
                    idx = target_idx;
                    iteration = 1;
                    continue;
                }
                NextMove::Advance => {
                    if iteration < loop_count {
                        iteration += 1;
                    } else {
                        idx += 1;
                        iteration = 1;
                    }
                }
            }
        }

        finish(results, true, None)
    }

    /// A step's collection context, if any, comes from the stored request it
    /// mirrors (flow steps themselves carry no `collection_id`).
    async fn step_collection(&self, step: &FlowStep) -> (Option<i64>, bool) {
        match step.request_id {
            Some(id) => match self.repo.get_request(id).await {
                Ok(r) => (r.collection_id, r.collection_id.is_some()),
                Err(_) => (None, false),
            },
            None => (None, false),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn script_context(
        &self,
        flow_name: &str,
        step: &FlowStep,
        iteration: u32,
        loop_count: u32,
        runtime_vars: &HashMap<String, String>,
        env_vars: &HashMap<String, String>,
        global_vars: &HashMap<String, String>,
        collection_vars: &HashMap<String, String>,
        has_collection_context: bool,
        request: RequestSnapshot,
        response: Option<ResponseSnapshot>,
        workspace_id: i64,
    ) -> ScriptContext {
        let executor = self.executor.clone();

        ScriptContext {
            runtime_vars: runtime_vars.clone(),
            env_vars: env_vars.clone(),
            global_vars: global_vars.clone(),
            collection_vars: collection_vars.clone(),
            has_collection_context,
            flow_name: flow_name.to_string(),
            step_name: step.name.clone(),
            step_order: step.step_order,
            iteration,
            loop_count,
            request,
            response,
            max_send_request_calls: self.limits.max_send_request_calls,
            send_request: Box::new(move |spec| {
                let executor = executor.clone();
                let headers_doc = serde_json::to_string(
                    &spec.headers.iter().cloned().collect::<HashMap<_, _>>(),
                )
                .unwrap_or_default();
                tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current().block_on(async move {
                        let body_type = if spec.body.is_some() {
                            workbench_core::domain::BodyType::Json
                        } else {
                            workbench_core::domain::BodyType::None
                        };
                        let body = spec.body.unwrap_or_default();
                        let result = executor
                            .execute_adhoc(
                                workspace_id,
                                &spec.method,
                                &spec.url,
                                &headers_doc,
                                &body,
                                body_type,
                                &HashMap::new(),
                                &BuiltinContext::default(),
                                workbench_core::domain::ProxySelector::Inherit,
                            )
                            .await;
                        workbench_script::SendRequestOutcome {
                            status_code: result.status_code,
                            headers: result.headers,
                            body: result.body,
                            error: result.error,
                        }
                    })
                })
            }),
        }
    }

    async fn persist_pending(
        &self,
        workspace_id: i64,
        collection_id: Option<i64>,
        script_result: &workbench_script::ScriptResult,
    ) {
        if !script_result.updated_global_vars.is_empty() {
            if let Ok(mut ws) = self.repo.get_workspace(workspace_id).await {
                apply_pending(&mut ws.variables, &script_result.updated_global_vars);
                let _ = self.repo.update_workspace_variables(workspace_id, ws.variables).await;
            }
        }
        if let Some(id) = collection_id {
            if !script_result.updated_collection_vars.is_empty() {
                if let Ok(mut collection) = self.repo.get_collection(id).await {
                    apply_pending(&mut collection.variables, &script_result.updated_collection_vars);
                    let _ = self.repo.update_collection(collection).await;
                }
            }
        }
        if !script_result.updated_env_vars.is_empty() {
            if let Ok(Some(mut env)) = self.repo.active_environment(workspace_id).await {
                apply_pending(&mut env.variables, &script_result.updated_env_vars);
                let _ = self.repo.update_environment(env).await;
            }
        }
    }

    /// Parses the step's legacy `extract_vars` map (`name -> jsonpath`) and
    /// applies each path to the response body. Failures silently skip.
    fn extract_vars(&self, extract_vars_doc: &str, response_body: &str) -> HashMap<String, String> {
        let mut out = HashMap::new();
        let trimmed = extract_vars_doc.trim();
        if trimmed.is_empty() || trimmed == "{}" {
            return out;
        }
        let Ok(map) = serde_json::from_str::<HashMap<String, String>>(extract_vars_doc) else {
            return out;
        };
        let Ok(body) = serde_json::from_str::<Value>(response_body) else {
            return out;
        };
        for (name, path) in map {
            if let Some(value) = extract_jsonpath(&body, &path) {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                out.insert(name, text);
            }
        }
        out
    }
}

fn extract_jsonpath(body: &Value, path: &str) -> Option<Value> {
    let query = JsonPath::from_str(path).ok()?;
    let found = query.find_slice(body);
    found.first().map(|v| v.clone().to_data())
}

/// Empty-string value deletes the key; every other value overwrites it.
fn apply_pending(target: &mut HashMap<String, String>, pending: &HashMap<String, String>) {
    for (k, v) in pending {
        if v.is_empty() {
            target.remove(k);
        } else {
            target.insert(k.clone(), v.clone());
        }
    }
}

fn merge_runtime(runtime_vars: &mut HashMap<String, String>, updated: &HashMap<String, String>) {
    for (k, v) in updated {
        runtime_vars.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestExecutor;
    use crate::test_support::{spawn_fake_http, InMemoryFileStore, InMemoryRepo};
    use workbench_core::domain::{BodyType, Flow, FlowStep, DEFAULT_WORKSPACE_ID};

    fn blank_step(id: i64, flow_id: i64, order: i64, name: &str, url: &str) -> FlowStep {
        FlowStep {
            id,
            flow_id,
            step_order: order,
            name: name.to_string(),
            method: "GET".to_string(),
            url: url.to_string(),
            headers: "{}".to_string(),
            body: String::new(),
            body_type: BodyType::None,
            cookies: String::new(),
            extract_vars: String::new(),
            condition: None,
            delay_ms: 0,
            loop_count: 1,
            continue_on_error: false,
            pre_script: None,
            post_script: None,
            proxy_id: None,
            request_id: None,
        }
    }

    fn runner(repo: Arc<InMemoryRepo>) -> FlowRunner {
        let executor = Arc::new(RequestExecutor::new(
            repo.clone(),
            Arc::new(InMemoryFileStore::default()),
            5,
            10,
        ));
        FlowRunner::new(repo, executor, LimitsConfig::default())
    }

    #[tokio::test]
    async fn test_run_flow_single_step_success() {
        let (base_url, hits) = spawn_fake_http(1);
        let repo = Arc::new(InMemoryRepo::new());
        repo.insert_flow(Flow {
            id: 1,
            workspace_id: DEFAULT_WORKSPACE_ID,
            name: "ping flow".to_string(),
            description: String::new(),
        });
        repo.insert_flow_step(blank_step(1, 1, 0, "ping", &format!("{base_url}/ping")));

        let result = runner(repo).run_flow(1, None).await;

        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status_code, Some(200));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_flow_empty_url_is_fatal() {
        let repo = Arc::new(InMemoryRepo::new());
        repo.insert_flow(Flow {
            id: 2,
            workspace_id: DEFAULT_WORKSPACE_ID,
            name: "broken".to_string(),
            description: String::new(),
        });
        repo.insert_flow_step(blank_step(2, 2, 0, "no-url", ""));

        let result = runner(repo).run_flow(2, None).await;

        assert!(!result.success);
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0].error.as_deref() == Some("step has no URL configured"));
    }

    #[tokio::test]
    async fn test_run_flow_skips_step_on_unmet_condition_without_dispatching() {
        let (base_url, hits) = spawn_fake_http(1);
        let repo = Arc::new(InMemoryRepo::new());
        repo.insert_flow(Flow {
            id: 3,
            workspace_id: DEFAULT_WORKSPACE_ID,
            name: "conditional".to_string(),
            description: String::new(),
        });
        let mut step = blank_step(3, 3, 0, "maybe", &format!("{base_url}/ping"));
        step.condition = Some("{{missing}}".to_string());
        repo.insert_flow_step(step);

        let result = runner(repo).run_flow(3, None).await;

        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0].skipped);
        assert_eq!(result.steps[0].skip_reason.as_deref(), Some("Condition not met"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_flow_loop_count_repeats_request() {
        let (base_url, hits) = spawn_fake_http(3);
        let repo = Arc::new(InMemoryRepo::new());
        repo.insert_flow(Flow {
            id: 4,
            workspace_id: DEFAULT_WORKSPACE_ID,
            name: "looping".to_string(),
            description: String::new(),
        });
        let mut step = blank_step(4, 4, 0, "loop", &format!("{base_url}/ping"));
        step.loop_count = 3;
        repo.insert_flow_step(step);

        let result = runner(repo).run_flow(4, None).await;

        assert!(result.success);
        assert_eq!(result.steps.len(), 3);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_flow_post_script_goto_jumps_to_named_step() {
        let (base_url, hits) = spawn_fake_http(2);
        let repo = Arc::new(InMemoryRepo::new());
        repo.insert_flow(Flow {
            id: 5,
            workspace_id: DEFAULT_WORKSPACE_ID,
            name: "goto".to_string(),
            description: String::new(),
        });
        let mut first = blank_step(5, 5, 0, "first", &format!("{base_url}/ping"));
        first.post_script = Some(
            r#"{"flow": {"action": "goto", "step": "last"}}"#.to_string(),
        );
        repo.insert_flow_step(first);
        repo.insert_flow_step(blank_step(6, 5, 1, "middle", &format!("{base_url}/skip")));
        repo.insert_flow_step(blank_step(7, 5, 2, "last", &format!("{base_url}/ping")));

        let result = runner(repo).run_flow(5, None).await;

        assert!(result.success);
        // "middle" is jumped over; only "first" and "last" dispatch.
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].step_name, "first");
        assert_eq!(result.steps[1].step_name, "last");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
