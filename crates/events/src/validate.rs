//! Inbound event validation and sanitization.
//!
//! Malformed events are repaired where possible (unknown levels fall back to
//! `INFO`, unknown phase statuses to `in_progress`, oversized messages are
//! truncated) and rejected only when the shape is unusable.

use serde_json::Value;

use crate::types::{kinds, LogLevel};

/// Maximum log message length before truncation.
const MAX_MESSAGE_LEN: usize = 10_000;
/// Truncated messages keep this many characters plus an ellipsis.
const TRUNCATED_LEN: usize = 9_997;

/// Phase statuses accepted on the wire.
pub const ALLOWED_PHASE_STATUSES: [&str; 12] = [
    "pending",
    "active",
    "in_progress",
    "completed",
    "error",
    "skipped",
    "interrupted",
    "running",
    "idle",
    "starting",
    "finishing",
    "failed",
];

/// Result of validating one event.
#[derive(Debug, PartialEq)]
pub enum Validation {
    /// Event accepted; `data` has been sanitized in place.
    Accepted,
    /// Event dropped with a reason (counted, not retried).
    Rejected(String),
}

/// Validate and sanitize an event payload for the given kind.
pub fn validate_event(kind: &str, data: &mut Value) -> Validation {
    let Some(map) = data.as_object_mut() else {
        return Validation::Rejected("event data must be a key-value object".to_string());
    };

    match kind {
        kinds::LOG_MESSAGE => {
            if !map.contains_key("message") {
                return Validation::Rejected("missing required field: message".to_string());
            }
            sanitize_log(map);
            Validation::Accepted
        }
        kinds::PHASE_START | kinds::PHASE_UPDATE | kinds::PHASE_COMPLETE | kinds::PHASE_ERROR => {
            if !map.contains_key("phase_id") {
                return Validation::Rejected("missing required field: phase_id".to_string());
            }
            sanitize_phase(map);
            Validation::Accepted
        }
        kinds::PROGRESS_UPDATE => sanitize_progress(map),
        kinds::STATUS_UPDATE => {
            stringify_field(map, "status");
            stringify_field(map, "phase");
            Validation::Accepted
        }
        // Unknown kinds pass through untouched; routing drops them later.
        _ => Validation::Accepted,
    }
}

fn stringify_field(map: &mut serde_json::Map<String, Value>, field: &str) {
    let value = match map.get(field) {
        Some(Value::String(_)) | None => return,
        Some(other) => other.to_string(),
    };
    map.insert(field.to_string(), Value::String(value));
}

fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sanitize_log(map: &mut serde_json::Map<String, Value>) {
    let level = map
        .get("level")
        .map(as_string)
        .unwrap_or_else(|| "INFO".to_string())
        .to_uppercase();
    let level = if LogLevel::ALLOWED.contains(&level.as_str()) {
        level
    } else {
        "INFO".to_string()
    };
    map.insert("level".to_string(), Value::String(level));

    let mut message = map.get("message").map(as_string).unwrap_or_default();
    if message.chars().count() > MAX_MESSAGE_LEN {
        message = message.chars().take(TRUNCATED_LEN).collect::<String>() + "...";
        map.insert("truncated".to_string(), Value::Bool(true));
    }
    map.insert("message".to_string(), Value::String(message));

    if !map.contains_key("timestamp") {
        map.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
}

fn sanitize_phase(map: &mut serde_json::Map<String, Value>) {
    let status = map
        .get("status")
        .map(as_string)
        .unwrap_or_else(|| "pending".to_string())
        .to_lowercase();
    let status = if ALLOWED_PHASE_STATUSES.contains(&status.as_str()) {
        status
    } else {
        "in_progress".to_string()
    };
    map.insert("status".to_string(), Value::String(status));

    let phase_id = map
        .get("phase_id")
        .map(as_string)
        .unwrap_or_else(|| "unknown".to_string());
    map.insert("phase_id".to_string(), Value::String(phase_id));

    let message = map.get("message").map(as_string).unwrap_or_default();
    map.insert("message".to_string(), Value::String(message));

    // Progress counts are optional; bad values are dropped, not fatal.
    let processed = map.get("processed_count").and_then(Value::as_i64);
    let total = map.get("total_count").and_then(Value::as_i64);
    match (map.contains_key("processed_count") || map.contains_key("total_count"), processed, total)
    {
        (false, _, _) => {}
        (true, Some(p), Some(t)) => {
            let t = t.max(0);
            let p = p.max(0).min(if t > 0 { t } else { p.max(0) });
            map.insert("processed_count".to_string(), Value::from(p));
            map.insert("total_count".to_string(), Value::from(t));
        }
        (true, _, _) => {
            map.remove("processed_count");
            map.remove("total_count");
        }
    }
}

fn sanitize_progress(map: &mut serde_json::Map<String, Value>) -> Validation {
    let has_counts = map.contains_key("processed_count") && map.contains_key("total_count");
    if !has_counts {
        return Validation::Accepted;
    }
    let (Some(processed), Some(total)) = (
        map.get("processed_count").and_then(Value::as_i64),
        map.get("total_count").and_then(Value::as_i64),
    ) else {
        return Validation::Rejected("progress counts must be integers".to_string());
    };
    if processed < 0 || total < 0 {
        return Validation::Rejected("progress counts cannot be negative".to_string());
    }
    if total > 0 && processed > total {
        return Validation::Rejected("processed count cannot exceed total".to_string());
    }
    let percentage = if total > 0 {
        (processed * 100) / total
    } else {
        0
    };
    map.insert("percentage".to_string(), Value::from(percentage));
    Validation::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_object_data_is_rejected() {
        let mut data = json!(["not", "an", "object"]);
        assert!(matches!(
            validate_event(kinds::LOG_MESSAGE, &mut data),
            Validation::Rejected(_)
        ));
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let mut data = json!({"message": "hi", "level": "shouting"});
        assert_eq!(validate_event(kinds::LOG_MESSAGE, &mut data), Validation::Accepted);
        assert_eq!(data["level"], "INFO");
        assert!(data["timestamp"].is_string());
    }

    #[test]
    fn lowercase_level_is_coerced() {
        let mut data = json!({"message": "hi", "level": "error"});
        validate_event(kinds::LOG_MESSAGE, &mut data);
        assert_eq!(data["level"], "ERROR");
    }

    #[test]
    fn long_messages_are_truncated_and_flagged() {
        let long = "x".repeat(12_000);
        let mut data = json!({"message": long});
        validate_event(kinds::LOG_MESSAGE, &mut data);
        let message = data["message"].as_str().unwrap();
        assert_eq!(message.chars().count(), 10_000);
        assert!(message.ends_with("..."));
        assert_eq!(data["truncated"], true);
    }

    #[test]
    fn log_without_message_is_rejected() {
        let mut data = json!({"level": "INFO"});
        assert!(matches!(
            validate_event(kinds::LOG_MESSAGE, &mut data),
            Validation::Rejected(_)
        ));
    }

    #[test]
    fn unknown_phase_status_becomes_in_progress() {
        let mut data = json!({"phase_id": "cp_cache", "status": "exploding"});
        assert_eq!(validate_event(kinds::PHASE_UPDATE, &mut data), Validation::Accepted);
        assert_eq!(data["status"], "in_progress");
    }

    #[test]
    fn phase_progress_counts_are_clamped() {
        let mut data = json!({
            "phase_id": "cp_media",
            "status": "running",
            "processed_count": 15,
            "total_count": 10
        });
        validate_event(kinds::PHASE_UPDATE, &mut data);
        assert_eq!(data["processed_count"], 10);
        assert_eq!(data["total_count"], 10);

        let mut negative = json!({
            "phase_id": "cp_media",
            "processed_count": -3,
            "total_count": 10
        });
        validate_event(kinds::PHASE_UPDATE, &mut negative);
        assert_eq!(negative["processed_count"], 0);
    }

    #[test]
    fn phase_malformed_counts_are_dropped_but_event_kept() {
        let mut data = json!({
            "phase_id": "cp_llm",
            "processed_count": "many",
            "total_count": 10
        });
        assert_eq!(validate_event(kinds::PHASE_UPDATE, &mut data), Validation::Accepted);
        assert!(data.get("processed_count").is_none());
        assert!(data.get("total_count").is_none());
    }

    #[test]
    fn progress_update_is_strict() {
        let mut over = json!({"processed_count": 11, "total_count": 10});
        assert!(matches!(
            validate_event(kinds::PROGRESS_UPDATE, &mut over),
            Validation::Rejected(_)
        ));

        let mut negative = json!({"processed_count": -1, "total_count": 10});
        assert!(matches!(
            validate_event(kinds::PROGRESS_UPDATE, &mut negative),
            Validation::Rejected(_)
        ));

        let mut ok = json!({"processed_count": 5, "total_count": 10});
        assert_eq!(validate_event(kinds::PROGRESS_UPDATE, &mut ok), Validation::Accepted);
        assert_eq!(ok["percentage"], 50);

        // Progress without counts passes through.
        let mut bare = json!({"operation": "warming up"});
        assert_eq!(validate_event(kinds::PROGRESS_UPDATE, &mut bare), Validation::Accepted);
    }

    #[test]
    fn status_fields_are_stringified() {
        let mut data = json!({"status": 3, "phase": true});
        assert_eq!(validate_event(kinds::STATUS_UPDATE, &mut data), Validation::Accepted);
        assert_eq!(data["status"], "3");
        assert_eq!(data["phase"], "true");
    }
}
