use thiserror::Error;

use magpie_store::StoreError;

/// Failures that escape a phase. Per-item port errors are classified and
/// absorbed inside the content phase; only store corruption, IO trouble at
/// the phase level, or explicitly fatal conditions surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}
