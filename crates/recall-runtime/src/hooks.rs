use serde_json::Value;
use std::path::Path;

// Hook payload normalization. Hosts disagree on field casing and nesting;
// the worker accepts the union and normalizes here. The hook executable
// itself always exits 0, so a payload this module rejects only costs the
// event, never the host session.

/// First matching string among aliased keys.
pub fn string_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| payload.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn value_field(payload: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .find_map(|key| payload.get(*key))
        .cloned()
        .unwrap_or(Value::Null)
}

pub fn content_session_id(payload: &Value) -> Option<String> {
    string_field(payload, &["session_id", "sessionId", "session"])
}

pub fn cwd(payload: &Value) -> Option<String> {
    string_field(payload, &["cwd", "working_directory", "workingDirectory"])
}

/// Explicit project name, else the basename of the working directory.
pub fn project(payload: &Value) -> String {
    if let Some(project) = string_field(payload, &["project", "project_name"]) {
        return project;
    }
    cwd(payload)
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn prompt_text(payload: &Value) -> Option<String> {
    string_field(payload, &["prompt", "prompt_text", "user_prompt", "text"])
}

pub fn tool_name(payload: &Value) -> Option<String> {
    string_field(payload, &["tool_name", "toolName", "tool"])
}

pub fn tool_input(payload: &Value) -> Value {
    value_field(payload, &["tool_input", "toolInput", "input", "parameters"])
}

pub fn tool_response(payload: &Value) -> Value {
    value_field(payload, &["tool_response", "toolResponse", "output", "response"])
}

pub fn last_assistant_message(payload: &Value) -> Option<String> {
    string_field(
        payload,
        &["last_assistant_message", "lastAssistantMessage", "assistant_message"],
    )
}
