//! Ingest wire format.
//!
//! Request: `{"readings": [{"local_id", "stream_key", "source_timestamp", ...fields}]}`.
//! Response: `{"status": "ok", "accepted": n}` plus one of `accepted_ids`,
//! `last_timestamps` (per stream key) or `last_timestamp`.

use std::collections::{BTreeMap, BTreeSet};

use sb_core::{format_timestamp, parse_timestamp};
use sb_queue::{QueueRecord, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReading {
    pub local_id: RecordId,
    pub stream_key: String,
    pub source_timestamp: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestBody {
    pub readings: Vec<IngestReading>,
}

impl IngestBody {
    pub fn from_records(records: &[QueueRecord]) -> Self {
        let readings = records
            .iter()
            .map(|r| {
                let mut fields = match &r.payload {
                    Value::Object(map) => map.clone(),
                    other => {
                        let mut map = Map::new();
                        map.insert("value".to_string(), other.clone());
                        map
                    }
                };
                // reserved names always come from the queue row
                for reserved in ["local_id", "stream_key", "source_timestamp"] {
                    fields.remove(reserved);
                }
                IngestReading {
                    local_id: r.id,
                    stream_key: r.record_key.clone(),
                    source_timestamp: format_timestamp(r.source_timestamp),
                    fields,
                }
            })
            .collect();
        Self { readings }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    #[serde(default)]
    pub accepted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamps: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_ids: Option<Vec<RecordId>>,
}

impl IngestResponse {
    pub fn ok(accepted: u64) -> Self {
        Self {
            status: "ok".to_string(),
            accepted: Some(accepted),
            ..Default::default()
        }
    }
}

/// Rows of `batch` that `response` confirms.
///
/// Acknowledgment never reaches beyond the rows that were actually sent.
///
/// # Errors
///
/// `Rejected` for a non-ok status, `MalformedResponse` when the response
/// carries no usable acknowledgment.
pub fn acked_ids(batch: &[QueueRecord], response: &IngestResponse) -> SyncResult<Vec<RecordId>> {
    if !response.status.eq_ignore_ascii_case("ok") {
        return Err(SyncError::Rejected {
            status: response.status.clone(),
        });
    }

    if let Some(ids) = &response.accepted_ids {
        let listed: BTreeSet<RecordId> = ids.iter().copied().collect();
        return Ok(batch
            .iter()
            .filter(|r| listed.contains(&r.id))
            .map(|r| r.id)
            .collect());
    }

    if let Some(per_key) = &response.last_timestamps {
        let mut limits = BTreeMap::new();
        for (key, ts) in per_key {
            limits.insert(key.as_str(), parse_limit(ts)?);
        }
        return Ok(batch
            .iter()
            .filter(|r| {
                limits
                    .get(r.record_key.as_str())
                    .is_some_and(|limit| r.source_timestamp <= *limit)
            })
            .map(|r| r.id)
            .collect());
    }

    if let Some(ts) = &response.last_timestamp {
        let limit = parse_limit(ts)?;
        return Ok(batch
            .iter()
            .filter(|r| r.source_timestamp <= limit)
            .map(|r| r.id)
            .collect());
    }

    match response.accepted {
        Some(n) if n as usize == batch.len() => Ok(batch.iter().map(|r| r.id).collect()),
        Some(n) => Err(SyncError::MalformedResponse {
            message: format!(
                "accepted {n} of {} without ids or timestamps",
                batch.len()
            ),
        }),
        None => Err(SyncError::MalformedResponse {
            message: "response carries no acknowledgment".to_string(),
        }),
    }
}

fn parse_limit(ts: &str) -> SyncResult<sb_core::Timestamp> {
    parse_timestamp(ts).map_err(|e| SyncError::MalformedResponse {
        message: e.to_string(),
    })
}
