use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three inbound broker channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Logs,
    Phase,
    Status,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Logs, Channel::Phase, Channel::Status];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Logs => "logs",
            Channel::Phase => "phase",
            Channel::Status => "status",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-format envelope carried on every broker channel.
///
/// Serialized as `{"type": ..., "data": {...}, "timestamp": RFC3339,
/// "channel": ...}`. The payload stays a JSON object end to end; typed
/// structs exist only at the producer boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event kind, e.g. `log_message`, `phase_update`, `status_update`.
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
}

impl EventEnvelope {
    pub fn new(kind: impl Into<String>, channel: Channel, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
            channel,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The `task_id` field of the payload, when present.
    pub fn task_id(&self) -> Option<&str> {
        self.data.get("task_id").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape() {
        let env = EventEnvelope::new(
            "log_message",
            Channel::Logs,
            json!({"task_id": "t1", "message": "hello"}),
        );
        let raw = env.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "log_message");
        assert_eq!(value["channel"], "logs");
        assert_eq!(value["data"]["message"], "hello");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn envelope_roundtrip() {
        let env = EventEnvelope::new("status_update", Channel::Status, json!({"task_id": "t9"}));
        let decoded = EventEnvelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.task_id(), Some("t9"));
    }

    #[test]
    fn channel_names() {
        assert_eq!(Channel::Logs.as_str(), "logs");
        assert_eq!(Channel::Phase.as_str(), "phase");
        assert_eq!(Channel::Status.as_str(), "status");
    }
}
