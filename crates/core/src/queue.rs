use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a queue row. `Processed` mirrors the item's
/// `processing_complete` flag; the validator repairs any drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Unprocessed,
    Processing,
    Processed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Unprocessed => "unprocessed",
            QueueStatus::Processing => "processing",
            QueueStatus::Processed => "processed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unprocessed" => Some(QueueStatus::Unprocessed),
            "processing" => Some(QueueStatus::Processing),
            "processed" => Some(QueueStatus::Processed),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One processing-queue row. Exactly one row exists per item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRow {
    pub item_id: String,
    pub status: QueueStatus,
    /// Sub-phase the item was last claimed for.
    pub phase: Option<String>,
    pub priority: i64,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueRow {
    pub fn new(item_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            item_id: item_id.into(),
            status: QueueStatus::Unprocessed,
            phase: None,
            priority: 0,
            retry_count: 0,
            last_error: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [
            QueueStatus::Unprocessed,
            QueueStatus::Processing,
            QueueStatus::Processed,
            QueueStatus::Failed,
        ] {
            assert_eq!(QueueStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(QueueStatus::parse("nope"), None);
    }

    #[test]
    fn new_row_defaults() {
        let row = QueueRow::new("i1");
        assert_eq!(row.status, QueueStatus::Unprocessed);
        assert_eq!(row.priority, 0);
        assert!(row.phase.is_none());
    }
}
