//! Builders for the subset of engine commands this crate issues.
//!
//! Every builder returns compact single-line JSON ready for
//! [`Manager::send_command`](crate::Manager::send_command).

use serde_json::{Value, json};

pub const FACTS: &str = "facts";
pub const STATUS: &str = "status";
pub const CREATE_EXPORT: &str = "create-export";
pub const LOAD_EXPORT: &str = "load-export";

/// Value of the `response` field with which the engine rejects a command.
pub const INVALID_COMMAND: &str = "invalid command";

fn simple(name: &str) -> String {
    json!({ "command": name }).to_string()
}

#[must_use]
pub fn facts() -> String {
    simple(FACTS)
}

#[must_use]
pub fn status() -> String {
    simple(STATUS)
}

#[must_use]
pub fn create_export() -> String {
    simple(CREATE_EXPORT)
}

/// `{"command":"load-export","graph":...}` with the graph embedded as-is.
#[must_use]
pub fn load_export(graph: &Value) -> String {
    json!({ "command": LOAD_EXPORT, "graph": graph }).to_string()
}

/// Turn caller-supplied command text into a single protocol line.
///
/// Two shapes are accepted:
/// - a JSON string whose content is the command (`"{\"command\":\"status\"}"`),
///   returned unquoted;
/// - any other JSON value, re-serialized compactly so it cannot span lines.
///
/// Blank input yields an empty command.
pub fn normalize_command(raw: &str) -> Result<String, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    match serde_json::from_str::<Value>(trimmed)? {
        Value::String(inner) => Ok(inner),
        other => Ok(other.to_string()),
    }
}

/// If `response` is the engine's rejection marker, return its message.
#[must_use]
pub fn rejection_message(response: &str) -> Option<String> {
    let value: Value = serde_json::from_str(response).ok()?;
    if value.get("response").and_then(Value::as_str) != Some(INVALID_COMMAND) {
        return None;
    }
    let message = match value.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "no message".to_string(),
        Some(other) => other.to_string(),
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands_are_compact() {
        assert_eq!(facts(), r#"{"command":"facts"}"#);
        assert_eq!(status(), r#"{"command":"status"}"#);
        assert_eq!(create_export(), r#"{"command":"create-export"}"#);
    }

    #[test]
    fn test_load_export_embeds_graph_on_one_line() {
        let graph = json!({"edges": [{"po": {"label": "+a().\n+b()."}}]});
        let line = load_export(&graph);
        assert!(!line.contains('\n'));
        assert!(line.starts_with(r#"{"command":"load-export","graph":"#));
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["graph"], graph);
    }

    #[test]
    fn test_normalize_string_form_is_unquoted() {
        let raw = r#""{\"command\": \"phrase\", \"text\": \"+fact(\\\"val\\\").\"}""#;
        let normalized = normalize_command(raw).unwrap();
        assert_eq!(
            normalized,
            r#"{"command": "phrase", "text": "+fact(\"val\")."}"#
        );
    }

    #[test]
    fn test_normalize_object_form_is_compacted() {
        let raw = "{\n  \"command\": \"phrase\",\n  \"text\": \"+fact(\\\"val\\\").\"\n}";
        let normalized = normalize_command(raw).unwrap();
        assert_eq!(
            normalized,
            r#"{"command":"phrase","text":"+fact(\"val\")."}"#
        );
    }

    #[test]
    fn test_normalize_blank_and_invalid() {
        assert_eq!(normalize_command("  \n").unwrap(), "");
        assert!(normalize_command("{not json").is_err());
    }

    #[test]
    fn test_rejection_message() {
        assert_eq!(
            rejection_message(r#"{"response":"invalid command","message":"parse error"}"#),
            Some("parse error".to_string())
        );
        assert_eq!(
            rejection_message(r#"{"response":"invalid command"}"#),
            Some("no message".to_string())
        );
        assert_eq!(rejection_message(r#"{"response":"success"}"#), None);
        assert_eq!(rejection_message("not json"), None);
    }
}
