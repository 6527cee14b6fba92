//! sb-sync: delivery of queued records to the remote ingest service.
//!
//! The worker reads unacknowledged rows from the durable queue, posts them
//! through an [`IngestTransport`], and advances acknowledgment only for rows
//! the response confirms. Any failure leaves the batch untouched for the next
//! interval.

pub mod protocol;
pub mod transport;
pub mod worker;

pub use protocol::{IngestBody, IngestReading, IngestResponse, acked_ids};
pub use transport::{Endpoints, HttpConfig, HttpTransport, IngestTransport};
pub use worker::{
    PassReport, StreamSchedule, SyncWorker, SyncWorkerConfig, retry_unless_exhausted,
};

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Remote returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Malformed ingest response: {message}")]
    MalformedResponse { message: String },

    #[error("Remote rejected batch with status {status:?}")]
    Rejected { status: String },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Queue error: {0}")]
    Queue(#[from] sb_queue::QueueError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Failures that leave the batch for the next interval.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Status { .. }
                | Self::MalformedResponse { .. }
                | Self::Rejected { .. }
        )
    }

    /// The local queue cannot take any more writes.
    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, Self::Queue(inner) if inner.is_storage_exhausted())
    }
}
