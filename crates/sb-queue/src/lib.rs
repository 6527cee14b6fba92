//! sb-queue: durable store-and-forward queue.
//!
//! Every reading and event is written here before any network attempt. Rows
//! are only flagged, never removed, until the remote side acknowledges them
//! and either retention pruning or an operator reset deletes them.

pub mod store;
pub mod types;

pub use store::QueueStore;
pub use types::*;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    /// The database refused a write because the disk is full.
    #[error("local queue storage exhausted: {message}")]
    StorageExhausted { message: String },

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stored timestamp is invalid: {0}")]
    Timestamp(#[from] sb_core::CoreError),

    #[error("Unknown stream: {name}")]
    UnknownStream { name: String },
}

impl QueueError {
    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, Self::StorageExhausted { .. })
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, message) = &err {
            if code.code == rusqlite::ErrorCode::DiskFull {
                return Self::StorageExhausted {
                    message: message.clone().unwrap_or_else(|| code.to_string()),
                };
            }
        }
        Self::Sqlite(err)
    }
}
