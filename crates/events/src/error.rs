use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("broker unavailable: {0}")]
    Broker(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish timed out after {0} ms")]
    PublishTimeout(u64),

    #[error("subscription closed")]
    SubscriptionClosed,
}
