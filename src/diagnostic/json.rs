use super::Diagnostic;

/// One diagnostic as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let mut obj = serde_json::json!({
        "severity": "error",
        "kind": d.kind,
        "message": d.message,
        "notes": d.notes,
    });
    if let Some(file) = &d.file {
        obj["file"] = serde_json::Value::from(file.as_str());
    }
    if let Some(line) = d.line {
        obj["line"] = serde_json::Value::from(line);
    }
    if let Some(col) = d.column() {
        obj["col"] = serde_json::Value::from(col);
    }
    if let Some(source) = &d.source {
        obj["source"] = serde_json::Value::from(source.as_str());
    }
    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}
