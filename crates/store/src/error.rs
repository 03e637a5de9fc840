use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad timestamp '{0}' in column {1}")]
    Timestamp(String, &'static str),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported database URL: {0}")]
    UnsupportedUrl(String),
}
