use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::collections::HashMap;
use std::str::FromStr;
use workbench_core::domain::{
    BodyType, Collection, Environment, Flow, FlowStep, History, Proxy, Request, UploadedFile,
    Workspace,
};

pub fn vars_from_json(doc: &str) -> HashMap<String, String> {
    if doc.trim().is_empty() {
        return HashMap::new();
    }
    serde_json::from_str(doc).unwrap_or_default()
}

pub fn vars_to_json(vars: &HashMap<String, String>) -> String {
    serde_json::to_string(vars).unwrap_or_else(|_| "{}".to_string())
}

pub fn workspace_from_row(row: &SqliteRow) -> Workspace {
    Workspace {
        id: row.get("id"),
        name: row.get("name"),
        variables: vars_from_json(&row.get::<String, _>("variables")),
    }
}

pub fn collection_from_row(row: &SqliteRow) -> Collection {
    Collection {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        sort_order: row.get("sort_order"),
        variables: vars_from_json(&row.get::<String, _>("variables")),
    }
}

fn body_type_from_str(s: &str) -> BodyType {
    BodyType::from_str(s).unwrap_or(BodyType::None)
}

pub fn request_from_row(row: &SqliteRow) -> Request {
    Request {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        collection_id: row.get("collection_id"),
        name: row.get("name"),
        method: row.get("method"),
        url: row.get("url"),
        headers: row.get("headers"),
        body: row.get("body"),
        body_type: body_type_from_str(&row.get::<String, _>("body_type")),
        cookies: row.get("cookies"),
        proxy_id: row.get("proxy_id"),
    }
}

pub fn environment_from_row(row: &SqliteRow) -> Environment {
    Environment {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        variables: vars_from_json(&row.get::<String, _>("variables")),
        is_active: row.get::<i64, _>("is_active") != 0,
    }
}

pub fn proxy_from_row(row: &SqliteRow) -> Proxy {
    Proxy {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        url: row.get("url"),
        is_active: row.get::<i64, _>("is_active") != 0,
    }
}

pub fn flow_from_row(row: &SqliteRow) -> Flow {
    Flow {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

pub fn flow_step_from_row(row: &SqliteRow) -> FlowStep {
    FlowStep {
        id: row.get("id"),
        flow_id: row.get("flow_id"),
        step_order: row.get("step_order"),
        name: row.get("name"),
        method: row.get("method"),
        url: row.get("url"),
        headers: row.get("headers"),
        body: row.get("body"),
        body_type: body_type_from_str(&row.get::<String, _>("body_type")),
        cookies: row.get("cookies"),
        extract_vars: row.get("extract_vars"),
        condition: row.get("condition"),
        delay_ms: row.get::<i64, _>("delay_ms") as u64,
        loop_count: workbench_core::domain::clamp_loop_count(row.get::<i64, _>("loop_count")),
        continue_on_error: row.get::<i64, _>("continue_on_error") != 0,
        pre_script: row.get("pre_script"),
        post_script: row.get("post_script"),
        proxy_id: row.get("proxy_id"),
        request_id: row.get("request_id"),
    }
}

pub fn uploaded_file_from_row(row: &SqliteRow) -> UploadedFile {
    UploadedFile {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        original_name: row.get("original_name"),
        stored_name: row.get("stored_name"),
        content_type: row.get("content_type"),
        size: row.get("size"),
    }
}

pub fn history_from_row(row: &SqliteRow) -> History {
    let created_at: String = row.get("created_at");
    History {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        request_id: row.get("request_id"),
        flow_id: row.get("flow_id"),
        method: row.get("method"),
        url: row.get("url"),
        request_headers: row.get("request_headers"),
        request_body: row.get("request_body"),
        status_code: row.get::<Option<i64>, _>("status_code").map(|v| v as u16),
        response_headers: row.get("response_headers"),
        response_body: row.get("response_body"),
        duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|v| v as u64),
        error: row.get("error"),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}
