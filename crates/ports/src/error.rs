use magpie_core::error::ErrorClass;
use thiserror::Error;

/// Typed failure from a capability port. The orchestrator classifies these
/// into the retry taxonomy via [`PortError::classify`].
#[derive(Error, Debug)]
pub enum PortError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} — {body}")]
    Api { status: u16, body: String },

    #[error("rate limited{}", retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("model refused the request: {0}")]
    Refused(String),

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("render error: {0}")]
    Render(String),

    #[error("command {program} failed ({status}): {stderr}")]
    Command {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("port not configured: {0}")]
    NotConfigured(String),
}

impl PortError {
    /// Map into the orchestrator's retry taxonomy.
    pub fn classify(&self) -> ErrorClass {
        match self {
            PortError::Http(_) | PortError::Timeout(_) | PortError::Io(_) => ErrorClass::Transient,
            PortError::RateLimited { .. } => ErrorClass::RateLimited,
            PortError::Api { status, .. } => match status {
                429 => ErrorClass::RateLimited,
                500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            PortError::Parse(_) | PortError::Render(_) => ErrorClass::Validation,
            PortError::Refused(_) => ErrorClass::Permanent,
            PortError::Command { .. } => ErrorClass::Transient,
            PortError::NotConfigured(_) => ErrorClass::Fatal,
        }
    }
}
