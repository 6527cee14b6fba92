//! Queue record types.

use std::fmt;
use std::str::FromStr;

use sb_core::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::QueueError;

/// Row id within one stream's table.
pub type RecordId = i64;

/// A kind of uploaded record. Each stream has its own table and endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Tank,
    Pump,
    Vacuum,
    ErrorLog,
}

impl Stream {
    pub const ALL: [Stream; 4] = [Stream::Tank, Stream::Pump, Stream::Vacuum, Stream::ErrorLog];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tank => "tank",
            Self::Pump => "pump",
            Self::Vacuum => "vacuum",
            Self::ErrorLog => "error_log",
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Tank => "tank_readings",
            Self::Pump => "pump_events",
            Self::Vacuum => "vacuum_readings",
            Self::ErrorLog => "error_logs",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stream::ALL
            .into_iter()
            .find(|stream| stream.as_str() == s)
            .ok_or_else(|| QueueError::UnknownStream {
                name: s.to_string(),
            })
    }
}

/// A record about to be enqueued.
///
/// `(record_key, source_timestamp)` identifies the record within its stream;
/// enqueueing the same pair again replaces the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub stream: Stream,
    pub record_key: String,
    pub source_timestamp: Timestamp,
    pub payload: Value,
}

impl NewRecord {
    pub fn new(
        stream: Stream,
        record_key: impl Into<String>,
        source_timestamp: Timestamp,
        payload: Value,
    ) -> Self {
        Self {
            stream,
            record_key: record_key.into(),
            source_timestamp,
            payload,
        }
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRecord {
    pub id: RecordId,
    pub stream: Stream,
    pub record_key: String,
    pub source_timestamp: Timestamp,
    pub payload: Value,
    pub created_at: Timestamp,
    pub sent: bool,
    pub acked: bool,
}

/// Which rows an acknowledgment covers.
#[derive(Debug, Clone, PartialEq)]
pub enum AckScope {
    /// Exactly these rows.
    Ids(Vec<RecordId>),
    /// Every row for `record_key` at or before `timestamp`.
    UpTo {
        record_key: String,
        timestamp: Timestamp,
    },
}

/// Row counts for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub stream: Stream,
    pub pending: u64,
    pub in_flight: u64,
    pub acked: u64,
}

impl StreamStatus {
    pub fn total(&self) -> u64 {
        self.pending + self.in_flight + self.acked
    }
}
