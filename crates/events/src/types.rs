//! Typed producer-side event payloads. On the wire these become the `data`
//! object of an [`crate::envelope::EventEnvelope`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event kind names used in envelopes and the outbound routing table.
pub mod kinds {
    pub const LOG_MESSAGE: &str = "log_message";
    pub const PHASE_START: &str = "phase_start";
    pub const PHASE_UPDATE: &str = "phase_update";
    pub const PHASE_COMPLETE: &str = "phase_complete";
    pub const PHASE_ERROR: &str = "phase_error";
    pub const PROGRESS_UPDATE: &str = "progress_update";
    pub const STATUS_UPDATE: &str = "status_update";
}

/// Log severity accepted on the `logs` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALLOWED: [&'static str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

/// Phase lifecycle moment being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEventKind {
    Start,
    Progress,
    Complete,
    Error,
}

impl PhaseEventKind {
    /// The envelope kind this lifecycle moment is published under.
    pub fn event_kind(self) -> &'static str {
        match self {
            PhaseEventKind::Start => kinds::PHASE_START,
            PhaseEventKind::Progress => kinds::PHASE_UPDATE,
            PhaseEventKind::Complete => kinds::PHASE_COMPLETE,
            PhaseEventKind::Error => kinds::PHASE_ERROR,
        }
    }

    /// The `status` field value carried in the payload.
    pub fn status(self) -> &'static str {
        match self {
            PhaseEventKind::Start => "starting",
            PhaseEventKind::Progress => "in_progress",
            PhaseEventKind::Complete => "completed",
            PhaseEventKind::Error => "error",
        }
    }
}

/// Payload for `log_message` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub task_id: String,
    /// Monotonically increasing per task; the UI orders by `(task_id, seq)`.
    pub seq: u64,
    pub level: LogLevel,
    pub message: String,
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Payload for `phase_start` / `phase_update` / `phase_complete` /
/// `phase_error` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub task_id: String,
    pub phase_id: String,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload for `progress_update` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub operation: String,
    pub processed_count: u64,
    pub total_count: u64,
    pub percentage: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(task_id: &str, operation: &str, processed: u64, total: u64) -> Self {
        let percentage = if total > 0 {
            (processed * 100) / total
        } else {
            0
        };
        Self {
            task_id: task_id.to_string(),
            operation: operation.to_string(),
            processed_count: processed,
            total_count: total,
            percentage,
            eta_seconds: None,
            timestamp: Utc::now(),
        }
    }
}

/// Payload for `status_update` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: String,
    pub is_running: bool,
    pub current_phase_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&LogLevel::Warning).unwrap(),
            "\"WARNING\""
        );
    }

    #[test]
    fn phase_kind_mapping() {
        assert_eq!(PhaseEventKind::Start.event_kind(), "phase_start");
        assert_eq!(PhaseEventKind::Progress.event_kind(), "phase_update");
        assert_eq!(PhaseEventKind::Complete.event_kind(), "phase_complete");
        assert_eq!(PhaseEventKind::Error.event_kind(), "phase_error");
        assert_eq!(PhaseEventKind::Error.status(), "error");
    }

    #[test]
    fn progress_percentage() {
        assert_eq!(ProgressEvent::new("t", "op", 5, 20).percentage, 25);
        assert_eq!(ProgressEvent::new("t", "op", 0, 0).percentage, 0);
    }

    #[test]
    fn optional_fields_omitted() {
        let event = PhaseEvent {
            task_id: "t1".to_string(),
            phase_id: "cp_cache".to_string(),
            status: "starting".to_string(),
            message: "go".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("eta_seconds").is_none());
        assert!(value.get("traceback").is_none());
        assert_eq!(value["phase_id"], "cp_cache");
    }
}
