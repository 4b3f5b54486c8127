//! Purpose: Shared queue-info JSON serializers for diagnostics and tooling.
//! Exports: `queue_info_json` and `bounds_json`.
//! Role: Keep the queue metadata envelope shape consistent for every caller.
//! Invariants: Stable key names for v1 queue info payloads; fields are additive-only.

use crate::api::{Bounds, QueueInfo, ValidationReport, ValidationStatus};
use serde_json::{Map, Value, json};

pub fn bounds_json(bounds: Bounds) -> Value {
    json!({
        "first": bounds.first_id,
        "last": bounds.last_id,
    })
}

pub fn queue_info_json(info: &QueueInfo) -> Value {
    let mut map = Map::new();
    map.insert("path".to_string(), json!(info.path.display().to_string()));
    map.insert("version".to_string(), json!(info.version));
    map.insert("record_count".to_string(), json!(info.record_count));
    map.insert("record_size".to_string(), json!(info.record_size));
    map.insert("file_size".to_string(), json!(info.file_size));
    map.insert("bounds".to_string(), bounds_json(info.bounds));
    map.insert("pending".to_string(), json!(info.bounds.pending()));
    Value::Object(map)
}

pub fn validation_report_json(report: &ValidationReport) -> Value {
    let status = match report.status {
        ValidationStatus::Ok => "ok",
        ValidationStatus::Corrupt => "corrupt",
    };
    let issues = report
        .issues
        .iter()
        .map(|issue| {
            let mut map = Map::new();
            map.insert("code".to_string(), json!(issue.code));
            map.insert("message".to_string(), json!(issue.message));
            if let Some(id) = issue.id {
                map.insert("id".to_string(), json!(id));
            }
            Value::Object(map)
        })
        .collect::<Vec<_>>();
    json!({
        "path": report.path.display().to_string(),
        "status": status,
        "checked": report.checked,
        "issues": issues,
    })
}
