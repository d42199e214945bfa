//! JavaScript script flavour: a Postman-compatible `pm.*` API hosted on
//! `boa_engine`, an embeddable pure-Rust JS interpreter. Boa has no direct
//! precedent in the reference corpus; it is the ecosystem-standard choice
//! for "run untrusted JS inside a Rust process" (see DESIGN.md).

use crate::context::{ScriptContext, SendRequestSpec};
use crate::result::{ErrorDetail, FlowAction, ScriptResult};
use boa_engine::{Context, JsError, JsResult, JsValue, NativeFunction, Source, js_string};
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use workbench_core::resolver::{self, ScopeStack};

/// Mutable state shared between the host closures registered on `pm` and the
/// final `ScriptResult` this module returns. `Rc<RefCell<_>>` because boa's
/// native closures require `'static` captures with interior mutability.
#[derive(Default)]
struct PmState {
    pending_env_writes: std::collections::HashMap<String, String>,
    pending_global_writes: std::collections::HashMap<String, String>,
    pending_collection_writes: std::collections::HashMap<String, String>,
    runtime_vars: std::collections::HashMap<String, String>,
    variables_out: std::collections::HashMap<String, String>,
    assertions_passed: u32,
    assertions_failed: u32,
    test_errors: Vec<ErrorDetail>,
    flow_action: FlowAction,
    goto_step_name: Option<String>,
    send_request_calls: u32,
    max_send_request_calls: u32,
}

pub fn run(script: &str, ctx: &mut ScriptContext) -> ScriptResult {
    let resolved_script = resolve_script_tokens(script, ctx);

    let state = Rc::new(RefCell::new(PmState {
        pending_env_writes: Default::default(),
        pending_global_writes: Default::default(),
        pending_collection_writes: Default::default(),
        runtime_vars: ctx.runtime_vars.clone(),
        variables_out: Default::default(),
        assertions_passed: 0,
        assertions_failed: 0,
        test_errors: Vec::new(),
        flow_action: FlowAction::Next,
        goto_step_name: None,
        send_request_calls: 0,
        max_send_request_calls: ctx.max_send_request_calls,
    }));

    let mut context = Context::default();
    if let Err(e) = install_pm(&mut context, state.clone(), ctx) {
        let mut result = ScriptResult::noop();
        result.push_error(format!("failed to initialise script sandbox: {e}"));
        return result;
    }

    let deadline = Instant::now() + Duration::from_millis(5000);
    let interrupt_handle = context.interrupt_handle();
    std::thread::spawn(move || {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining);
        interrupt_handle.set_interrupt();
    });

    let mut result = ScriptResult::noop();
    match context.eval(Source::from_bytes(resolved_script.as_bytes())) {
        Ok(_) => {}
        Err(e) => {
            let message = e.to_string();
            let (line, column) = parse_error_location(&message);
            if message.contains("interrupted") {
                result.push_error("Script timeout");
            } else {
                result.push_error(message.clone());
            }
            result.error_details.push(ErrorDetail {
                message,
                line,
                column,
            });
        }
    }

    let state = state.borrow();
    result.assertions_passed = state.assertions_passed;
    result.assertions_failed = state.assertions_failed;
    if state.assertions_failed > 0 {
        result.success = false;
        for e in &state.test_errors {
            result.errors.push(e.message.clone());
        }
    }
    result.error_details.extend(state.test_errors.clone());

    let mut runtime_vars = state.runtime_vars.clone();
    runtime_vars.extend(state.variables_out.clone());
    result.updated_runtime_vars = runtime_vars;
    result.updated_env_vars = state.pending_env_writes.clone();
    result.updated_global_vars = state.pending_global_writes.clone();
    result.updated_collection_vars = state.pending_collection_writes.clone();
    result.flow_action = state.flow_action;
    result.goto_step_name = state.goto_step_name.clone();

    if result.errors.is_empty() && result.assertions_failed == 0 {
        result.success = true;
    }
    result
}

/// Substitutes `{{name}}` in the script text itself, preferring any pending
/// writes from this same run over their backing scope.
fn resolve_script_tokens(script: &str, ctx: &ScriptContext) -> String {
    let scopes = ScopeStack::new()
        .push(&ctx.runtime_vars)
        .push(&ctx.env_vars)
        .push(&ctx.collection_vars)
        .push(&ctx.global_vars);
    resolver::resolve(script, &scopes)
}

fn parse_error_location(message: &str) -> (Option<u32>, Option<u32>) {
    static RE: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"at line (\d+), column (\d+)").unwrap());
    match RE.captures(message) {
        Some(caps) => (
            caps.get(1).and_then(|m| m.as_str().parse().ok()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
        ),
        None => (None, None),
    }
}

fn js_err(message: impl Into<String>) -> JsError {
    boa_engine::JsNativeError::error()
        .with_message(message.into())
        .into()
}

fn install_pm(context: &mut Context, state: Rc<RefCell<PmState>>, ctx: &mut ScriptContext) -> JsResult<()> {
    let env_vars = ctx.env_vars.clone();
    let global_vars = ctx.global_vars.clone();
    let collection_vars = ctx.collection_vars.clone();
    let has_collection_context = ctx.has_collection_context;

    let environment = build_scope_object(
        context,
        state.clone(),
        env_vars,
        |s| &mut s.pending_env_writes,
        |s, k| {
            s.runtime_vars
                .get(k)
                .cloned()
                .or_else(|| s.pending_env_writes.get(k).cloned())
        },
    )?;
    context.register_global_property(js_string!("__pm_environment"), environment, Attribute::all())?;

    let globals = build_scope_object(
        context,
        state.clone(),
        global_vars,
        |s| &mut s.pending_global_writes,
        |_s, _k| None,
    )?;
    context.register_global_property(js_string!("__pm_globals"), globals, Attribute::all())?;

    if has_collection_context {
        let collection = build_scope_object(
            context,
            state.clone(),
            collection_vars,
            |s| &mut s.pending_collection_writes,
            |_s, _k| None,
        )?;
        context.register_global_property(js_string!("__pm_collectionVariables"), collection, Attribute::all())?;
    }

    // pm.variables: runtime-only, never buffered (spec Open Question, preserved deliberately).
    let variables = {
        let get_state = state.clone();
        let set_state = state.clone();
        ObjectInitializer::new(context)
            .function(
                NativeFunction::from_copy_closure_with_captures(
                    |_this, args, state, _ctx| {
                        let name = arg_string(args, 0);
                        let value = state
                            .borrow()
                            .variables_out
                            .get(&name)
                            .cloned()
                            .or_else(|| state.borrow().runtime_vars.get(&name).cloned());
                        Ok(js_value_or_undefined(value))
                    },
                    get_state,
                ),
                js_string!("get"),
                1,
            )
            .function(
                NativeFunction::from_copy_closure_with_captures(
                    |_this, args, state, _ctx| {
                        let name = arg_string(args, 0);
                        let value = arg_string(args, 1);
                        state.borrow_mut().variables_out.insert(name, value);
                        Ok(JsValue::undefined())
                    },
                    set_state,
                ),
                js_string!("set"),
                2,
            )
            .build()
    };
    context.register_global_property(js_string!("__pm_variables"), variables, Attribute::all())?;

    // pm.response
    let response_json = ctx
        .response
        .as_ref()
        .map(|r| r.body.clone())
        .unwrap_or_default();
    let status_code = ctx.response.as_ref().map(|r| r.status_code).unwrap_or(0);
    let duration_ms = ctx.response.as_ref().map(|r| r.duration_ms).unwrap_or(0);
    let headers: Vec<(String, String)> = ctx
        .response
        .as_ref()
        .map(|r| r.headers.clone())
        .unwrap_or_default();

    let response_obj = {
        let body_for_text = response_json.clone();
        let body_for_json = response_json.clone();
        let headers_for_get = headers.clone();
        ObjectInitializer::new(context)
            .property(js_string!("code"), status_code, Attribute::all())
            .property(js_string!("status"), status_code, Attribute::all())
            .property(js_string!("responseTime"), duration_ms as f64, Attribute::all())
            .function(
                NativeFunction::from_copy_closure_with_captures(
                    move |_this, _args, body, _ctx| Ok(JsValue::from(js_string!(body.as_str()))),
                    body_for_text,
                ),
                js_string!("text"),
                0,
            )
            .function(
                NativeFunction::from_copy_closure_with_captures(
                    move |_this, _args, body, ctx| {
                        let json_text = if body.is_empty() { "null" } else { body.as_str() };
                        match boa_engine::JsValue::from_json(
                            &serde_json::from_str(json_text).unwrap_or(serde_json::Value::Null),
                            ctx,
                        ) {
                            Ok(v) => Ok(v),
                            Err(_) => Err(js_err("response body is not valid JSON")),
                        }
                    },
                    body_for_json,
                ),
                js_string!("json"),
                0,
            )
            .function(
                NativeFunction::from_copy_closure_with_captures(
                    move |_this, args, headers, _ctx| {
                        let name = arg_string(args, 0);
                        let found = headers
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
                            .map(|(_, v)| v.clone());
                        Ok(js_value_or_undefined(found))
                    },
                    headers_for_get,
                ),
                js_string!("header"),
                1,
            )
            .build()
    };
    context.register_global_property(js_string!("pm_response"), response_obj, Attribute::all())?;

    // pm.request (read-only snapshot)
    let request_obj = ObjectInitializer::new(context)
        .property(js_string!("url"), js_string!(ctx.request.url.as_str()), Attribute::all())
        .property(js_string!("method"), js_string!(ctx.request.method.as_str()), Attribute::all())
        .property(js_string!("body"), js_string!(ctx.request.body.as_str()), Attribute::all())
        .build();
    context.register_global_property(js_string!("pm_request"), request_obj, Attribute::all())?;

    // pm.info
    let info_obj = ObjectInitializer::new(context)
        .property(js_string!("iteration"), ctx.iteration, Attribute::all())
        .property(js_string!("loopCount"), ctx.loop_count, Attribute::all())
        .property(js_string!("requestName"), js_string!(ctx.step_name.as_str()), Attribute::all())
        .build();
    context.register_global_property(js_string!("pm_info"), info_obj, Attribute::all())?;

    // pm.execution.setNextRequest / skipRequest
    let exec_state = state.clone();
    let execution_obj = ObjectInitializer::new(context)
        .function(
            NativeFunction::from_copy_closure_with_captures(
                |_this, args, state, _ctx| {
                    let mut state = state.borrow_mut();
                    match args.first() {
                        None | Some(JsValue::Null) | Some(JsValue::Undefined) => {
                            state.flow_action = FlowAction::Stop;
                        }
                        Some(v) => {
                            let name = v.to_string(&mut Context::default()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
                            if name.is_empty() {
                                state.flow_action = FlowAction::Stop;
                            } else {
                                state.flow_action = FlowAction::Goto;
                                state.goto_step_name = Some(name);
                            }
                        }
                    }
                    Ok(JsValue::undefined())
                },
                exec_state,
            ),
            js_string!("setNextRequest"),
            1,
        )
        .build();
    context.register_global_property(js_string!("pm_execution"), execution_obj, Attribute::all())?;

    // pm.test(name, fn)
    let test_state = state.clone();
    let test_fn = NativeFunction::from_copy_closure_with_captures(
        |_this, args, state, ctx| {
            let name = arg_string(args, 0);
            let Some(cb) = args.get(1).and_then(|v| v.as_callable()) else {
                return Ok(JsValue::undefined());
            };
            match cb.call(&JsValue::undefined(), &[], ctx) {
                Ok(_) => {
                    state.borrow_mut().assertions_passed += 1;
                }
                Err(e) => {
                    let mut s = state.borrow_mut();
                    s.assertions_failed += 1;
                    s.test_errors.push(ErrorDetail {
                        message: format!("{name}: {e}"),
                        line: None,
                        column: None,
                    });
                }
            }
            Ok(JsValue::undefined())
        },
        test_state,
    );
    context.register_global_callable(js_string!("pm_test"), 2, test_fn)?;

    install_send_request(context, state.clone(), ctx)?;

    context.eval(Source::from_bytes(PM_PRELUDE.as_bytes()))?;
    Ok(())
}

type SendRequestFn = Box<dyn FnMut(SendRequestSpec) -> crate::context::SendRequestOutcome>;

/// `pm.sendRequest`'s backing closure is owned by `ScriptContext` (not
/// borrowed), so it can move into the same `Rc<RefCell<_>>` captured by every
/// other native function registered on `context` without any unsafe lifetime
/// bridging.
fn install_send_request(context: &mut Context, state: Rc<RefCell<PmState>>, ctx: &mut ScriptContext) -> JsResult<()> {
    let send_request: Rc<RefCell<SendRequestFn>> =
        Rc::new(RefCell::new(std::mem::replace(&mut ctx.send_request, Box::new(|_| crate::context::SendRequestOutcome {
            status_code: 0,
            headers: vec![],
            body: String::new(),
            error: Some("send_request unavailable".to_string()),
        }))));

    let send_fn = NativeFunction::from_copy_closure_with_captures(
        |_this, args, (state, send_request): &mut (Rc<RefCell<PmState>>, Rc<RefCell<SendRequestFn>>), ctx| {
            {
                let mut st = state.borrow_mut();
                if st.send_request_calls >= st.max_send_request_calls {
                    return Err(js_err("pm.sendRequest call limit exceeded"));
                }
                st.send_request_calls += 1;
            }

            let (url, method, headers, body) = parse_send_request_args(args, ctx)?;
            let spec = SendRequestSpec {
                url,
                method,
                headers,
                body,
            };

            let outcome = (send_request.borrow_mut())(spec);

            let response_obj = ObjectInitializer::new(ctx)
                .property(js_string!("code"), outcome.status_code, Attribute::all())
                .property(js_string!("status"), outcome.status_code, Attribute::all())
                .property(js_string!("body"), js_string!(outcome.body.as_str()), Attribute::all())
                .build();

            if let Some(cb) = args.get(1).and_then(|v| v.as_callable()) {
                let err_val = match &outcome.error {
                    Some(e) => JsValue::from(js_string!(e.as_str())),
                    None => JsValue::null(),
                };
                cb.call(&JsValue::undefined(), &[err_val, response_obj.clone().into()], ctx)?;
            }
            Ok(response_obj.into())
        },
        (state, send_request),
    );
    context.register_global_callable(js_string!("pm_send_request"), 2, send_fn)?;
    Ok(())
}

fn parse_send_request_args(args: &[JsValue], ctx: &mut Context) -> JsResult<(String, String, Vec<(String, String)>, Option<String>)> {
    match args.first() {
        Some(JsValue::Object(obj)) => {
            let url = obj
                .get(js_string!("url"), ctx)?
                .to_string(ctx)
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_default();
            let method = obj
                .get(js_string!("method"), ctx)
                .ok()
                .and_then(|v| v.to_string(ctx).ok())
                .map(|s| s.to_std_string_escaped())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "GET".to_string());
            let body = obj
                .get(js_string!("body"), ctx)
                .ok()
                .and_then(|v| v.to_string(ctx).ok())
                .map(|s| s.to_std_string_escaped())
                .filter(|s| s != "undefined");
            let headers = match obj.get(js_string!("headers"), ctx) {
                Ok(JsValue::Object(headers_obj)) => {
                    let keys = headers_obj.own_property_keys(ctx).unwrap_or_default();
                    keys.into_iter()
                        .filter_map(|key| {
                            let key_str = key.to_string();
                            let v = headers_obj.get(key.clone(), ctx).ok()?;
                            let v_str = v.to_string(ctx).ok()?.to_std_string_escaped();
                            Some((key_str, v_str))
                        })
                        .collect()
                }
                _ => Vec::new(),
            };
            Ok((url, method, headers, body))
        }
        Some(v) => {
            let url = v.to_string(ctx)?.to_std_string_escaped();
            Ok((url, "GET".to_string(), Vec::new(), None))
        }
        None => Ok((String::new(), "GET".to_string(), Vec::new(), None)),
    }
}

fn build_scope_object(
    context: &mut Context,
    state: Rc<RefCell<PmState>>,
    backing: std::collections::HashMap<String, String>,
    pending_of: fn(&mut PmState) -> &mut std::collections::HashMap<String, String>,
    extra_read: fn(&PmState, &str) -> Option<String>,
) -> JsResult<boa_engine::JsObject> {
    let get_state = state.clone();
    let get_backing = backing.clone();
    let set_state = state.clone();
    let has_state = state.clone();
    let has_backing = backing.clone();
    let unset_state = state.clone();
    let clear_state = state.clone();
    let clear_backing_keys: Vec<String> = backing.keys().cloned().collect();

    Ok(ObjectInitializer::new(context)
        .function(
            NativeFunction::from_copy_closure_with_captures(
                move |_this, args, (state, backing): &mut (Rc<RefCell<PmState>>, std::collections::HashMap<String, String>), _ctx| {
                    let name = arg_string(args, 0);
                    let pending = pending_of(&mut state.borrow_mut()).get(&name).cloned();
                    let value = pending
                        .or_else(|| extra_read(&state.borrow(), &name))
                        .or_else(|| backing.get(&name).cloned());
                    Ok(js_value_or_undefined(value))
                },
                (get_state, get_backing),
            ),
            js_string!("get"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure_with_captures(
                move |_this, args, state: &mut Rc<RefCell<PmState>>, _ctx| {
                    let name = arg_string(args, 0);
                    let value = arg_string(args, 1);
                    let mut s = state.borrow_mut();
                    pending_of(&mut s).insert(name.clone(), value.clone());
                    s.runtime_vars.insert(name, value);
                    Ok(JsValue::undefined())
                },
                set_state,
            ),
            js_string!("set"),
            2,
        )
        .function(
            NativeFunction::from_copy_closure_with_captures(
                move |_this, args, (state, backing): &mut (Rc<RefCell<PmState>>, std::collections::HashMap<String, String>), _ctx| {
                    let name = arg_string(args, 0);
                    let mut s = state.borrow_mut();
                    let present = pending_of(&mut s).contains_key(&name) || backing.contains_key(&name);
                    Ok(JsValue::from(present))
                },
                (has_state, has_backing),
            ),
            js_string!("has"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure_with_captures(
                move |_this, args, state: &mut Rc<RefCell<PmState>>, _ctx| {
                    let name = arg_string(args, 0);
                    pending_of(&mut state.borrow_mut()).insert(name, String::new());
                    Ok(JsValue::undefined())
                },
                unset_state,
            ),
            js_string!("unset"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure_with_captures(
                move |_this, _args, (state, keys): &mut (Rc<RefCell<PmState>>, Vec<String>), _ctx| {
                    let mut s = state.borrow_mut();
                    for k in keys.iter() {
                        pending_of(&mut s).insert(k.clone(), String::new());
                    }
                    Ok(JsValue::undefined())
                },
                (clear_state, clear_backing_keys),
            ),
            js_string!("clear"),
            0,
        )
        .build())
}

fn arg_string(args: &[JsValue], idx: usize) -> String {
    args.get(idx)
        .map(|v| match v {
            JsValue::String(s) => s.to_std_string_escaped(),
            other => other.display().to_string(),
        })
        .unwrap_or_default()
}

fn js_value_or_undefined(value: Option<String>) -> JsValue {
    match value {
        Some(v) => JsValue::from(js_string!(v.as_str())),
        None => JsValue::undefined(),
    }
}

/// JS-side glue assembling `pm.*` from the primitive globals registered above,
/// plus `pm.expect`/`pm.test` chai-style chains that are easier to express in
/// JS than via native closures, and the `parseInt`/`parseFloat` helpers.
const PM_PRELUDE: &str = r#"
const pm = {
    environment: {
        get: (n) => __pm_environment.get(n),
        set: (n, v) => __pm_environment.set(n, String(v)),
        has: (n) => __pm_environment.has(n),
    },
    variables: {
        get: (n) => __pm_variables.get(n),
        set: (n, v) => __pm_variables.set(n, String(v)),
    },
    globals: {
        get: (n) => __pm_globals.get(n),
        set: (n, v) => __pm_globals.set(n, String(v)),
        has: (n) => __pm_globals.has(n),
        unset: (n) => __pm_globals.unset(n),
        clear: () => __pm_globals.clear(),
    },
    collectionVariables: typeof __pm_collectionVariables !== "undefined" ? {
        get: (n) => __pm_collectionVariables.get(n),
        set: (n, v) => __pm_collectionVariables.set(n, String(v)),
        has: (n) => __pm_collectionVariables.has(n),
        unset: (n) => __pm_collectionVariables.unset(n),
        clear: () => __pm_collectionVariables.clear(),
    } : {
        get: () => undefined, set: () => {}, has: () => false, unset: () => {}, clear: () => {},
    },
    response: {
        code: pm_response.code,
        status: pm_response.status,
        responseTime: pm_response.responseTime,
        headers: { get: (n) => pm_response.header(n) },
        text: () => pm_response.text(),
        json: () => pm_response.json(),
        to: {
            have: {
                status: (n) => { if (pm_response.code !== n) throw new Error(`expected status ${n} got ${pm_response.code}`); },
                header: (n) => { if (pm_response.header(n) === undefined) throw new Error(`missing header ${n}`); },
                get jsonBody() { return pm_response.json(); },
            },
        },
    },
    request: {
        url: pm_request.url,
        method: pm_request.method,
        headers: { get: () => undefined },
        body: { toString: () => pm_request.body },
    },
    info: {
        iteration: pm_info.iteration,
        loopCount: pm_info.loopCount,
        requestName: pm_info.requestName,
    },
    execution: {
        setNextRequest: (n) => pm_execution.setNextRequest(n),
        skipRequest: () => pm_execution.setNextRequest(undefined),
    },
    test: (name, fn) => pm_test(name, fn),
    sendRequest: (urlOrObj, cb) => pm_send_request(urlOrObj, cb),
    expect: (actual) => {
        const deepEqual = (a, b) => JSON.stringify(a) === JSON.stringify(b);
        const typeOf = (v) => v === null ? "null" : Array.isArray(v) ? "array" : typeof v;
        const chain = {
            to: {
                equal: (expected) => { if (actual !== expected) throw new Error(`expected ${actual} to equal ${expected}`); },
                eql: (expected) => { if (!deepEqual(actual, expected)) throw new Error("expected deep equality"); },
                include: (expected) => {
                    const ok = typeof actual === "string" ? actual.includes(expected)
                        : Array.isArray(actual) ? actual.includes(expected) : false;
                    if (!ok) throw new Error(`expected ${actual} to include ${expected}`);
                },
                be: {
                    true: () => { if (actual !== true) throw new Error("expected true"); },
                    false: () => { if (actual !== false) throw new Error("expected false"); },
                    null: () => { if (actual !== null) throw new Error("expected null"); },
                    undefined: () => { if (actual !== undefined) throw new Error("expected undefined"); },
                    a: (t) => { if (typeOf(actual) !== t) throw new Error(`expected type ${t}`); },
                    an: (t) => { if (typeOf(actual) !== t) throw new Error(`expected type ${t}`); },
                    above: (n) => { if (!(actual > n)) throw new Error(`expected ${actual} above ${n}`); },
                    greaterThan: (n) => { if (!(actual > n)) throw new Error(`expected ${actual} above ${n}`); },
                    below: (n) => { if (!(actual < n)) throw new Error(`expected ${actual} below ${n}`); },
                    lessThan: (n) => { if (!(actual < n)) throw new Error(`expected ${actual} below ${n}`); },
                },
                have: {
                    property: (name) => { if (!(name in Object(actual))) throw new Error(`missing property ${name}`); },
                    length: (n) => { if (actual.length !== n) throw new Error(`expected length ${n}`); },
                },
            },
        };
        chain.to.contain = chain.to.include;
        return chain;
    },
};
"#;
