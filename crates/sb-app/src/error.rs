//! Error types for the sb-app service layer.

use std::path::PathBuf;

/// Application error type that wraps errors from the backend crates.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Local storage exhausted: {message}")]
    StorageExhausted { message: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Replay error: {0}")]
    Replay(String),

    #[error("Control error: {0}")]
    Control(String),

    #[error("Failed to write signal cache: {path}")]
    CacheWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sb-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// The one failure that must stop the controller.
    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, Self::StorageExhausted { .. })
    }
}

impl From<sb_config::ConfigError> for AppError {
    fn from(err: sb_config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<sb_queue::QueueError> for AppError {
    fn from(err: sb_queue::QueueError) -> Self {
        if err.is_storage_exhausted() {
            AppError::StorageExhausted {
                message: err.to_string(),
            }
        } else {
            AppError::Queue(err.to_string())
        }
    }
}

impl From<sb_sync::SyncError> for AppError {
    fn from(err: sb_sync::SyncError) -> Self {
        match err {
            sb_sync::SyncError::Queue(inner) => inner.into(),
            other => AppError::Sync(other.to_string()),
        }
    }
}

impl From<sb_replay::ReplayError> for AppError {
    fn from(err: sb_replay::ReplayError) -> Self {
        AppError::Replay(err.to_string())
    }
}

impl From<sb_controls::ControlError> for AppError {
    fn from(err: sb_controls::ControlError) -> Self {
        AppError::Control(err.to_string())
    }
}
