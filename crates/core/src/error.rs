use serde::{Deserialize, Serialize};

/// How a failure should be handled by the orchestrator.
///
/// The classification drives the retry policy: transient and rate-limited
/// failures are rescheduled with backoff, validation failures are handed to
/// the repair sweep, permanent failures park the item, and fatal failures
/// end the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network hiccups, timeouts, 5xx responses, DB deadlocks. Retried with backoff.
    Transient,
    /// Upstream asked us to slow down. Retried after the indicated (or default) delay.
    RateLimited,
    /// Contract/schema mismatch. Not retried; the validator repair path handles it.
    Validation,
    /// 4xx from a port, hard LLM refusal after max attempts. Parked until an operator acts.
    Permanent,
    /// Invalid config, unavailable store. Fails the whole run.
    Fatal,
}

impl ErrorClass {
    /// Whether the orchestrator should schedule another attempt automatically.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::RateLimited)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Validation => "validation",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Fatal => "fatal",
        }
    }
}

/// Which stage of item processing produced the last recorded error.
///
/// Keys of the per-item `errors` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    Fetch,
    Media,
    Llm,
    Kb,
}

impl ItemErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemErrorKind::Fetch => "fetch",
            ItemErrorKind::Media => "media",
            ItemErrorKind::Llm => "llm",
            ItemErrorKind::Kb => "kb",
        }
    }
}

impl std::fmt::Display for ItemErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
