use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Renderer error: {0}")]
    Render(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Geocoding error: {0}")]
    Geocode(String),

    #[error("Notification rate limited, retry after {retry_after}s")]
    NotifyRateLimited { retry_after: u64 },

    #[error("Notification failed with status {status}: {message}")]
    Notify { status: u16, message: String },

    #[error("No source produced any results")]
    NoSourceSucceeded,
}

pub type Result<T> = std::result::Result<T, MonitorError>;
