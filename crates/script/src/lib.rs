//! Runs a pre/post-request script, in either the declarative JSON DSL or
//! the JavaScript flavour, against a shared [`ScriptContext`].
//!
//! Flavour is picked by the script's first non-whitespace character: `{`
//! selects the JSON DSL, anything else JavaScript. An empty script is a
//! no-op.

pub mod context;
pub mod dsl;
pub mod jsengine;
pub mod result;

pub use context::{
    RequestSnapshot, ResponseSnapshot, ScriptContext, SendRequestOutcome, SendRequestSpec,
};
pub use result::{ErrorDetail, FlowAction, ScriptResult};

pub fn run(script: &str, ctx: &mut ScriptContext) -> ScriptResult {
    let trimmed = script.trim_start();
    if trimmed.is_empty() {
        return ScriptResult::noop();
    }
    if trimmed.starts_with('{') {
        dsl::run(script, ctx)
    } else {
        jsengine::run(script, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_script_is_noop() {
        let mut ctx = ScriptContext {
            runtime_vars: Default::default(),
            env_vars: Default::default(),
            global_vars: Default::default(),
            collection_vars: Default::default(),
            has_collection_context: false,
            flow_name: "f".to_string(),
            step_name: "s".to_string(),
            step_order: 1,
            iteration: 1,
            loop_count: 1,
            request: RequestSnapshot::default(),
            response: None,
            max_send_request_calls: 10,
            send_request: Box::new(|_| SendRequestOutcome {
                status_code: 0,
                headers: Vec::new(),
                body: String::new(),
                error: Some("not used".to_string()),
            }),
        };
        let result = run("   ", &mut ctx);
        assert!(result.success);
        assert_eq!(result.flow_action, FlowAction::Next);
    }

    #[test]
    fn test_flavour_detection_picks_dsl_for_brace_prefix() {
        let mut ctx = ScriptContext {
            runtime_vars: Default::default(),
            env_vars: Default::default(),
            global_vars: Default::default(),
            collection_vars: Default::default(),
            has_collection_context: false,
            flow_name: "f".to_string(),
            step_name: "s".to_string(),
            step_order: 1,
            iteration: 1,
            loop_count: 1,
            request: RequestSnapshot::default(),
            response: None,
            max_send_request_calls: 10,
            send_request: Box::new(|_| SendRequestOutcome {
                status_code: 0,
                headers: Vec::new(),
                body: String::new(),
                error: Some("not used".to_string()),
            }),
        };
        let result = run(r#"  { "assertions": [] }"#, &mut ctx);
        assert!(result.success);
    }
}
