//! JSON-DSL script flavour: declarative assertions, variable mutation, and
//! flow control, selected when a script's first non-whitespace byte is `{`.

use crate::context::ScriptContext;
use crate::result::{ErrorDetail, FlowAction, ScriptResult};
use jsonpath_rust::JsonPath;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use workbench_core::expr;

pub fn run(script: &str, ctx: &mut ScriptContext) -> ScriptResult {
    let doc: Value = match serde_json::from_str(script) {
        Ok(v) => v,
        Err(e) => {
            let mut result = ScriptResult::noop();
            result.push_error(format!("invalid assertion DSL JSON: {e}"));
            result.error_details.push(ErrorDetail {
                message: e.to_string(),
                line: None,
                column: None,
            });
            return result;
        }
    };

    let mut result = ScriptResult::noop();
    let mut runtime_vars = ctx.runtime_vars.clone();

    if let Some(assertions) = doc.get("assertions").and_then(Value::as_array) {
        for assertion in assertions {
            run_assertion(assertion, ctx, &mut result);
        }
    }

    if let Some(set_vars) = doc.get("setVariables").and_then(Value::as_array) {
        for entry in set_vars {
            run_set_variable(entry, ctx, &mut runtime_vars);
        }
    }

    result.updated_runtime_vars = runtime_vars;

    if let Some(flow) = doc.get("flow") {
        apply_flow(flow, ctx, &mut result);
    }

    if !result.errors.is_empty() || result.assertions_failed > 0 {
        result.success = false;
    } else {
        result.success = true;
    }
    result
}

fn response_body_json(ctx: &ScriptContext) -> Option<Value> {
    let body = &ctx.response.as_ref()?.body;
    serde_json::from_str(body).ok()
}

fn run_assertion(assertion: &Value, ctx: &ScriptContext, result: &mut ScriptResult) {
    let kind = assertion.get("type").and_then(Value::as_str).unwrap_or("");
    let operator = assertion.get("operator").and_then(Value::as_str).unwrap_or("eq");
    let expected = assertion.get("value").cloned().unwrap_or(Value::Null);
    let name = assertion.get("name").and_then(Value::as_str).unwrap_or(kind);

    let response = match &ctx.response {
        Some(r) => r,
        None => {
            result.assertions_failed += 1;
            result.errors.push(format!("Assertion failed: {name} (no response available)"));
            return;
        }
    };

    let passed = match kind {
        "status" => compare(operator, &response.status_code.to_string(), &expected),
        "responseTime" => compare(operator, &response.duration_ms.to_string(), &expected),
        "bodyContains" => {
            let needle = expected.as_str().unwrap_or_default();
            response.body.contains(needle)
        }
        "header" => {
            let header_name = assertion.get("path").and_then(Value::as_str).unwrap_or("");
            let actual = response
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(header_name))
                .map(|(_, v)| v.clone());
            match actual {
                Some(v) => compare(operator, &v, &expected),
                None => operator == "exists" && expected.as_bool() == Some(false),
            }
        }
        "jsonpath" => {
            let path = assertion.get("path").and_then(Value::as_str).unwrap_or("$");
            let body = response_body_json(ctx);
            let found = body.and_then(|b| extract_jsonpath(&b, path));
            if operator == "exists" {
                found.is_some()
            } else {
                match found {
                    Some(v) => compare(operator, &value_to_string(&v), &expected),
                    None => false,
                }
            }
        }
        _ => {
            result.errors.push(format!("unknown assertion type '{kind}'"));
            false
        }
    };

    if passed {
        result.assertions_passed += 1;
    } else {
        result.assertions_failed += 1;
        result
            .errors
            .push(format!("Assertion failed: {kind} {operator} {expected}"));
    }
}

fn extract_jsonpath(body: &Value, path: &str) -> Option<Value> {
    let query = JsonPath::from_str(path).ok()?;
    let found = query.find_slice(body);
    found.first().map(|v| v.clone().to_data())
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(operator: &str, actual: &str, expected: &Value) -> bool {
    match operator {
        "eq" => values_eq(actual, expected),
        "ne" => !values_eq(actual, expected),
        "gt" | "gte" | "lt" | "lte" => {
            let (Some(a), Some(b)) = (actual.parse::<f64>().ok(), expected_as_f64(expected)) else {
                return false;
            };
            match operator {
                "gt" => a > b,
                "gte" => a >= b,
                "lt" => a < b,
                "lte" => a <= b,
                _ => unreachable!(),
            }
        }
        "contains" => actual.contains(&expected.as_str().unwrap_or_default().to_string()),
        "in" => expected
            .as_array()
            .map(|arr| arr.iter().any(|v| values_eq(actual, v)))
            .unwrap_or(false),
        "regex" => regex::Regex::new(expected.as_str().unwrap_or_default())
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
        "exists" => true,
        _ => values_eq(actual, expected),
    }
}

fn values_eq(actual: &str, expected: &Value) -> bool {
    match expected {
        Value::String(s) => actual == s,
        Value::Number(n) => actual.parse::<f64>().ok() == n.as_f64(),
        Value::Bool(b) => actual == b.to_string(),
        Value::Null => actual.is_empty(),
        other => actual == other.to_string(),
    }
}

fn expected_as_f64(expected: &Value) -> Option<f64> {
    match expected {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn run_set_variable(entry: &Value, ctx: &ScriptContext, vars: &mut HashMap<String, String>) {
    let Some(name) = entry.get("name").and_then(Value::as_str) else {
        return;
    };
    let operation = entry.get("operation").and_then(Value::as_str).unwrap_or("set");

    let new_value = match operation {
        "set" => {
            if let Some(from) = entry.get("from").and_then(Value::as_str) {
                response_body_json(ctx)
                    .and_then(|body| extract_jsonpath(&body, from))
                    .map(|v| value_to_string(&v))
            } else {
                entry
                    .get("value")
                    .map(|v| value_to_string(v))
                    .or_else(|| Some(String::new()))
            }
        }
        "increment" | "decrement" => {
            let by = entry.get("by").and_then(Value::as_f64).unwrap_or(1.0);
            let current: f64 = vars.get(name).and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let delta = if operation == "increment" { by } else { -by };
            Some(format_number(current + delta))
        }
        "math" => {
            let expression = entry.get("expression").and_then(Value::as_str).unwrap_or("");
            let resolved = resolve_expr_vars(expression, vars);
            evaluate_binary_math(&resolved).map(format_number)
        }
        "concat" => entry.get("values").and_then(Value::as_array).map(|parts| {
            parts
                .iter()
                .map(|p| {
                    let s = value_to_string(p);
                    resolve_expr_vars(&s, vars)
                })
                .collect::<Vec<_>>()
                .join("")
        }),
        "conditional" => {
            let condition = entry.get("condition").and_then(Value::as_str).unwrap_or("");
            let resolved_condition = resolve_expr_vars(condition, vars);
            let branch = if expr::evaluate(&resolved_condition) {
                entry.get("ifTrue")
            } else {
                entry.get("ifFalse")
            };
            branch.map(|v| value_to_string(v))
        }
        _ => None,
    };

    if let Some(value) = new_value {
        vars.insert(name.to_string(), value);
    }
}

fn resolve_expr_vars(text: &str, vars: &HashMap<String, String>) -> String {
    let layers = workbench_core::resolver::ScopeStack::new().push(vars);
    workbench_core::resolver::resolve(text, &layers)
}

/// Same as [`resolve_expr_vars`] but checks the full scope chain (runtime >
/// env > collection > global), matching §4.1's priority order, rather than
/// runtime vars alone.
fn resolve_expr_scoped(text: &str, ctx: &ScriptContext) -> String {
    let layers = workbench_core::resolver::ScopeStack::new()
        .push(&ctx.runtime_vars)
        .push(&ctx.env_vars)
        .push(&ctx.collection_vars)
        .push(&ctx.global_vars);
    workbench_core::resolver::resolve(text, &layers)
}

/// Evaluates a single resolved binary arithmetic expression, e.g. `"3 + 4"`.
/// Supports `+`, `-`, `*`, `/` on the two (already variable-resolved)
/// operands; returns `None` for anything that doesn't parse as `<num> <op>
/// <num>`.
fn evaluate_binary_math(expr: &str) -> Option<f64> {
    const OPS: &[char] = &['+', '-', '*', '/'];
    let trimmed = expr.trim();
    for op in OPS {
        // Scan from the right so a leading unary sign on the left operand
        // (e.g. "-3 + 4") isn't mistaken for the operator.
        if let Some(pos) = trimmed.rfind(*op) {
            if pos == 0 {
                continue;
            }
            let (lhs, rhs) = trimmed.split_at(pos);
            let rhs = &rhs[1..];
            let (Some(a), Some(b)) = (lhs.trim().parse::<f64>().ok(), rhs.trim().parse::<f64>().ok()) else {
                continue;
            };
            return match op {
                '+' => Some(a + b),
                '-' => Some(a - b),
                '*' => Some(a * b),
                '/' if b != 0.0 => Some(a / b),
                _ => None,
            };
        }
    }
    trimmed.parse::<f64>().ok()
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn apply_flow(flow: &Value, ctx: &ScriptContext, result: &mut ScriptResult) {
    let flow_type = flow.get("type").and_then(Value::as_str).unwrap_or("");

    match flow_type {
        "conditional" => {
            let condition = flow.get("condition").and_then(Value::as_str).unwrap_or("");
            let resolved = resolve_expr_scoped(condition, ctx);
            let branch = if expr::evaluate(&resolved) {
                flow.get("onTrue")
            } else {
                flow.get("onFalse")
            };
            if let Some(action) = branch {
                apply_unconditional_flow(action, result);
            }
        }
        "switch" => {
            let default = flow.get("default");
            let cases = flow.get("cases").and_then(Value::as_array).cloned().unwrap_or_default();
            let mut matched = false;
            for case in &cases {
                let condition = case.get("condition").and_then(Value::as_str).unwrap_or("");
                let resolved = resolve_expr_scoped(condition, ctx);
                if expr::evaluate(&resolved) {
                    apply_unconditional_flow(case, result);
                    matched = true;
                    break;
                }
            }
            if !matched {
                if let Some(default) = default {
                    apply_action_str(default.as_str().unwrap_or("next"), result);
                }
            }
        }
        _ => apply_unconditional_flow(flow, result),
    }
}

fn apply_unconditional_flow(flow: &Value, result: &mut ScriptResult) {
    let action = flow.get("action").and_then(Value::as_str).unwrap_or("next");
    apply_action_str(action, result);
    if action == "goto" {
        if let Some(step) = flow.get("step").and_then(Value::as_str) {
            result.goto_step_name = Some(step.to_string());
        }
        if let Some(order) = flow.get("stepOrder").and_then(Value::as_i64) {
            result.goto_step_order = Some(order);
        }
    }
}

fn apply_action_str(action: &str, result: &mut ScriptResult) {
    result.flow_action = match action {
        "stop" => FlowAction::Stop,
        "repeat" => FlowAction::Repeat,
        "goto" => FlowAction::Goto,
        _ => FlowAction::Next,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestSnapshot, ResponseSnapshot, SendRequestOutcome, SendRequestSpec};

    fn noop_send(_: SendRequestSpec) -> SendRequestOutcome {
        SendRequestOutcome {
            status_code: 0,
            headers: vec![],
            body: String::new(),
            error: Some("not available in tests".to_string()),
        }
    }

    fn base_ctx() -> ScriptContext {
        ScriptContext {
            runtime_vars: HashMap::new(),
            env_vars: HashMap::new(),
            global_vars: HashMap::new(),
            collection_vars: HashMap::new(),
            has_collection_context: false,
            flow_name: "f".to_string(),
            step_name: "s".to_string(),
            step_order: 0,
            iteration: 1,
            loop_count: 1,
            request: RequestSnapshot::default(),
            response: Some(ResponseSnapshot {
                status_code: 200,
                headers: vec![],
                body: "{}".to_string(),
                duration_ms: 10,
            }),
            max_send_request_calls: 10,
            send_request: Box::new(noop_send),
        }
    }

    #[test]
    fn test_status_assertion_pass() {
        let mut ctx = base_ctx();
        let result = run(r#"{"assertions":[{"type":"status","operator":"eq","value":200}]}"#, &mut ctx);
        assert!(result.success);
        assert_eq!(result.assertions_passed, 1);
        assert_eq!(result.assertions_failed, 0);
    }

    #[test]
    fn test_status_assertion_fail() {
        let mut ctx = base_ctx();
        let result = run(r#"{"assertions":[{"type":"status","operator":"eq","value":404}]}"#, &mut ctx);
        assert!(!result.success);
        assert_eq!(result.assertions_failed, 1);
    }

    #[test]
    fn test_set_variable_increment() {
        let mut ctx = base_ctx();
        ctx.runtime_vars.insert("count".to_string(), "3".to_string());
        let result = run(r#"{"setVariables":[{"name":"count","operation":"increment","by":2}]}"#, &mut ctx);
        assert_eq!(result.updated_runtime_vars.get("count").unwrap(), "5");
    }

    #[test]
    fn test_set_variable_math_resolves_and_computes() {
        let mut ctx = base_ctx();
        ctx.runtime_vars.insert("a".to_string(), "3".to_string());
        ctx.runtime_vars.insert("b".to_string(), "4".to_string());
        let result = run(
            r#"{"setVariables":[{"name":"total","operation":"math","expression":"{{a}} + {{b}}"}]}"#,
            &mut ctx,
        );
        assert_eq!(result.updated_runtime_vars.get("total").unwrap(), "7");
    }

    #[test]
    fn test_flow_goto() {
        let mut ctx = base_ctx();
        let result = run(r#"{"flow":{"action":"goto","step":"Step2"}}"#, &mut ctx);
        assert_eq!(result.flow_action, FlowAction::Goto);
        assert_eq!(result.goto_step_name.as_deref(), Some("Step2"));
    }

    #[test]
    fn test_empty_script_is_noop() {
        // empty-script shortcut lives in lib.rs::run_script, not dsl::run
        let ctx = base_ctx();
        assert!(ctx.response.is_some());
    }
}
