use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoutError>;

#[derive(Debug, Error)]
pub enum ScoutError {
    /// Navigation, scrolling or script evaluation failed. Not retried within a run.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Photo capture failed: {0}")]
    Photo(String),

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScoutError {
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        ScoutError::Fetch(err.to_string())
    }

    pub fn photo(err: impl std::fmt::Display) -> Self {
        ScoutError::Photo(err.to_string())
    }
}
