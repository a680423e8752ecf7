use serde_json::{Value, json};

use crate::protocol::ToolResponse;
use crate::types::{ConsoleLogEntry, ElementSnapshot, NetworkRequestEntry};

/// JSON body printed for a successful response
pub fn to_json(response: &ToolResponse) -> serde_json::Result<Value> {
    Ok(match response {
        ToolResponse::Success(message) => json!({ "success": true, "message": message }),
        ToolResponse::Bool(ok) => json!({ "success": ok }),
        ToolResponse::Text(text) => json!({ "text": text }),
        ToolResponse::Snapshot(snapshot) => serde_json::to_value(snapshot)?,
        ToolResponse::Snapshots(snapshots) => serde_json::to_value(snapshots)?,
        ToolResponse::Value(value) => value.clone(),
        ToolResponse::ConsoleLogs(logs) => serde_json::to_value(logs)?,
        ToolResponse::NetworkRequests(requests) => serde_json::to_value(requests)?,
        ToolResponse::Error { message, exit_code } => json!({
            "error": true,
            "message": message,
            "exit_code": exit_code
        }),
        ToolResponse::Pong => json!({ "status": "running" }),
    })
}

/// Plain text rendering, one item per line
pub fn to_simple(response: &ToolResponse) -> String {
    match response {
        ToolResponse::Success(message) => message.clone(),
        ToolResponse::Bool(ok) => ok.to_string(),
        ToolResponse::Text(text) => text.clone(),
        ToolResponse::Snapshot(Some(snapshot)) => snapshot_lines(snapshot),
        ToolResponse::Snapshot(None) => "(no element)".to_string(),
        ToolResponse::Snapshots(snapshots) => snapshots
            .iter()
            .map(snapshot_lines)
            .collect::<Vec<_>>()
            .join("\n"),
        ToolResponse::Value(value) => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        ToolResponse::ConsoleLogs(logs) => logs.iter().map(console_line).collect::<Vec<_>>().join("\n"),
        ToolResponse::NetworkRequests(requests) => requests
            .iter()
            .map(request_line)
            .collect::<Vec<_>>()
            .join("\n"),
        ToolResponse::Error { message, .. } => format!("Error: {}", message),
        ToolResponse::Pong => "running".to_string(),
    }
}

fn snapshot_lines(snapshot: &ElementSnapshot) -> String {
    let mut lines = Vec::new();
    push_snapshot(snapshot, 0, &mut lines);
    lines.join("\n")
}

fn push_snapshot(snapshot: &ElementSnapshot, indent: usize, lines: &mut Vec<String>) {
    let mut line = format!("{}{}", "  ".repeat(indent), snapshot.tag);
    if let Some(id) = &snapshot.id {
        line.push_str(&format!("#{}", id));
    }
    if let Some(class) = &snapshot.class {
        for cls in class.split_whitespace() {
            line.push_str(&format!(".{}", cls));
        }
    }
    if !snapshot.text.is_empty() {
        line.push_str(&format!(" \"{}\"", snapshot.text));
    }
    line.push_str(&format!("  [{}]", snapshot.selector));
    lines.push(line);

    for child in &snapshot.children {
        push_snapshot(child, indent + 1, lines);
    }
}

fn console_line(entry: &ConsoleLogEntry) -> String {
    let mut line = format!("[{}] {}: {}", entry.timestamp.to_rfc3339(), entry.level, entry.text);
    if let Some(location) = &entry.location {
        line.push_str(&format!(
            " ({}:{}:{})",
            location.url, location.line_number, location.column_number
        ));
    }
    line
}

fn request_line(entry: &NetworkRequestEntry) -> String {
    format!(
        "[{}] {} {} ({})",
        entry.timestamp.to_rfc3339(),
        entry.method,
        entry.url,
        entry.resource_type
    )
}
