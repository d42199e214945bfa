//! `{{name}}` substitution against a priority-ordered scope stack, and
//! header-document parsing (legacy flat map vs. structured `{value,enabled}`).
//!
//! Callers build a [`ScopeStack`] themselves (highest-priority layer first)
//! rather than flattening it into one map: later layers must stay reachable
//! so a binding that only exists in a low-priority layer is still found when
//! a higher layer doesn't shadow it.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap());

/// Priority-ordered list of variable maps, highest-priority first.
#[derive(Default)]
pub struct ScopeStack<'a> {
    layers: Vec<&'a HashMap<String, String>>,
}

impl<'a> ScopeStack<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push(mut self, layer: &'a HashMap<String, String>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.layers
            .iter()
            .find_map(|layer| layer.get(name).map(|v| v.as_str()))
    }
}

/// Replaces every `{{ name }}` occurrence with its bound value. Unbound
/// tokens are left verbatim. Never fails.
pub fn resolve(text: &str, scopes: &ScopeStack) -> String {
    TOKEN_RE
        .replace_all(text, |caps: &regex::Captures| {
            let name = caps[1].trim();
            match scopes.get(name) {
                Some(v) => v.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Context for the built-in pseudo-variables available to every resolve
/// call inside a flow run. Fields are populated incrementally as a step
/// executes; absent fields are simply omitted from the resulting map.
#[derive(Debug, Clone, Default)]
pub struct BuiltinContext {
    pub iteration: Option<u32>,
    pub loop_count: Option<u32>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub response_body: Option<String>,
    pub step_name: Option<String>,
    pub step_order: Option<i64>,
    pub flow_name: Option<String>,
}

/// Builds the `__foo__` pseudo-variable layer. `__timestamp__` and
/// `__uuid__` are generated fresh on every call, matching their
/// per-resolution semantics (a fixed value would defeat their purpose).
pub fn builtin_vars(ctx: &BuiltinContext) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(
        "__timestamp__".to_string(),
        chrono::Utc::now().timestamp().to_string(),
    );
    map.insert("__uuid__".to_string(), uuid::Uuid::new_v4().to_string());
    if let Some(v) = ctx.iteration {
        map.insert("__iteration__".to_string(), v.to_string());
    }
    if let Some(v) = ctx.loop_count {
        map.insert("__loopCount__".to_string(), v.to_string());
    }
    if let Some(v) = ctx.status_code {
        map.insert("__statusCode__".to_string(), v.to_string());
    }
    if let Some(v) = ctx.response_time_ms {
        map.insert("__responseTime__".to_string(), v.to_string());
    }
    if let Some(v) = &ctx.response_body {
        map.insert("__responseBody__".to_string(), v.clone());
    }
    if let Some(v) = &ctx.step_name {
        map.insert("__stepName__".to_string(), v.clone());
    }
    if let Some(v) = ctx.step_order {
        map.insert("__stepOrder__".to_string(), v.to_string());
    }
    if let Some(v) = &ctx.flow_name {
        map.insert("__flowName__".to_string(), v.clone());
    }
    map
}

/// Parses a headers JSON document, trying the structured shape
/// `{name: {value, enabled}}` first and falling back to the legacy flat
/// map `{name: value}`. Keys and values are both resolved. Disabled
/// structured entries are dropped. Malformed/empty documents resolve to
/// no headers rather than an error.
pub fn resolve_headers(doc: &str, scopes: &ScopeStack) -> Vec<(String, String)> {
    if doc.trim().is_empty() {
        return Vec::new();
    }
    let value: serde_json::Value = match serde_json::from_str(doc) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let Some(obj) = value.as_object() else {
        return Vec::new();
    };
    if obj.is_empty() {
        return Vec::new();
    }

    let all_structured = obj.values().all(|v| {
        v.as_object()
            .map(|e| e.contains_key("enabled"))
            .unwrap_or(false)
    });

    let raw_pairs: Vec<(String, String)> = if all_structured {
        obj.iter()
            .filter_map(|(k, v)| {
                let entry = v.as_object()?;
                let enabled = entry.get("enabled").and_then(|e| e.as_bool()).unwrap_or(false);
                if !enabled {
                    return None;
                }
                let val = entry.get("value").and_then(|x| x.as_str()).unwrap_or("");
                Some((k.clone(), val.to_string()))
            })
            .collect()
    } else {
        obj.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    };

    raw_pairs
        .into_iter()
        .map(|(k, v)| (resolve(&k, scopes), resolve(&v, scopes)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_unbound_token_left_verbatim() {
        let scopes = ScopeStack::new();
        assert_eq!(resolve("hello {{name}}", &scopes), "hello {{name}}");
    }

    #[test]
    fn test_resolve_strips_surrounding_whitespace() {
        let mut runtime = HashMap::new();
        runtime.insert("name".to_string(), "world".to_string());
        let scopes = ScopeStack::new().push(&runtime);
        assert_eq!(resolve("hello {{  name  }}", &scopes), "hello world");
    }

    #[test]
    fn test_resolve_priority_highest_wins() {
        let mut runtime = HashMap::new();
        runtime.insert("v".to_string(), "runtime".to_string());
        let mut env = HashMap::new();
        env.insert("v".to_string(), "env".to_string());
        let mut workspace = HashMap::new();
        workspace.insert("v".to_string(), "workspace".to_string());

        let scopes = ScopeStack::new().push(&runtime).push(&env).push(&workspace);
        assert_eq!(resolve("{{v}}", &scopes), "runtime");

        let scopes = ScopeStack::new().push(&env).push(&workspace);
        assert_eq!(resolve("{{v}}", &scopes), "env");
    }

    #[test]
    fn test_resolve_headers_legacy() {
        let doc = r#"{"X-Token": "{{token}}"}"#;
        let mut runtime = HashMap::new();
        runtime.insert("token".to_string(), "abc123".to_string());
        let scopes = ScopeStack::new().push(&runtime);
        let headers = resolve_headers(doc, &scopes);
        assert_eq!(headers, vec![("X-Token".to_string(), "abc123".to_string())]);
    }

    #[test]
    fn test_resolve_headers_structured_skips_disabled() {
        let doc = r#"{
            "X-On": {"value": "v1", "enabled": true},
            "X-Off": {"value": "v2", "enabled": false}
        }"#;
        let scopes = ScopeStack::new();
        let headers = resolve_headers(doc, &scopes);
        assert_eq!(headers, vec![("X-On".to_string(), "v1".to_string())]);
    }

    #[test]
    fn test_resolve_headers_malformed_json_is_empty() {
        let scopes = ScopeStack::new();
        assert!(resolve_headers("not json", &scopes).is_empty());
        assert!(resolve_headers("", &scopes).is_empty());
    }
}
