use thiserror::Error;

/// Top-level error type for Shamba.
#[derive(Debug, Error)]
pub enum ShambaError {
    /// Phone number failed normalization.
    #[error("invalid phone number: {0}")]
    Phone(String),

    /// Error talking to the SMS gateway vendor.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Message log / subscription store error.
    #[error("store error: {0}")]
    Store(String),

    /// Webhook payload could not be verified or understood.
    #[error("webhook error: {0}")]
    Webhook(String),

    /// Price lookup provider error.
    #[error("price provider error: {0}")]
    Prices(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
