//! SQLite-backed queue store.
//!
//! Only this module talks to the database. Every process on the device opens
//! its own `QueueStore` on the same file; WAL journaling and a busy timeout let
//! one writer and several readers share it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use sb_core::{Clock, SystemClock, format_timestamp, parse_timestamp};

use crate::types::{AckScope, NewRecord, QueueRecord, RecordId, Stream, StreamStatus};
use crate::QueueResult;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct QueueStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

struct RawRow {
    id: RecordId,
    record_key: String,
    source_timestamp: String,
    payload: String,
    created_at: String,
    sent: bool,
    acked: bool,
}

impl QueueStore {
    /// Open (creating if needed) the queue database at `path`.
    pub fn open(path: &Path) -> QueueResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            clock: Arc::new(SystemClock),
        };
        store.migrate()?;
        tracing::debug!(path = %path.display(), "opened queue store");
        Ok(store)
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
            clock: Arc::new(SystemClock),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Use `clock` for `created_at` stamps and retention cutoffs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open a fresh connection to the same file, as a restarted process would.
    pub fn reopen(&self) -> QueueResult<Self> {
        match &self.path {
            Some(p) => Ok(Self::open(p)?.with_clock(self.clock.clone())),
            None => Self::in_memory(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> QueueResult<()> {
        let conn = self.conn();
        for stream in Stream::ALL {
            let table = stream.table();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    record_key TEXT NOT NULL,
                    source_timestamp TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    sent_to_server INTEGER NOT NULL DEFAULT 0,
                    acked_by_server INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(record_key, source_timestamp)
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_pending
                    ON {table}(acked_by_server, source_timestamp);"
            ))?;
        }
        Ok(())
    }

    /// Durably record one reading or event.
    ///
    /// A record with the same key and source timestamp is replaced in place.
    /// If the payload changed, the row is flagged for delivery again.
    pub fn enqueue(&self, record: &NewRecord) -> QueueResult<RecordId> {
        let table = record.stream.table();
        let payload = serde_json::to_string(&record.payload)?;
        let created_at = format_timestamp(self.clock.now());
        let conn = self.conn();
        let id: RecordId = conn.query_row(
            &format!(
                "INSERT INTO {table}
                    (record_key, source_timestamp, payload, created_at, sent_to_server, acked_by_server)
                 VALUES (?1, ?2, ?3, ?4, 0, 0)
                 ON CONFLICT(record_key, source_timestamp) DO UPDATE SET
                    sent_to_server = CASE WHEN {table}.payload = excluded.payload
                        THEN {table}.sent_to_server ELSE 0 END,
                    acked_by_server = CASE WHEN {table}.payload = excluded.payload
                        THEN {table}.acked_by_server ELSE 0 END,
                    payload = excluded.payload
                 RETURNING id"
            ),
            params![
                record.record_key,
                format_timestamp(record.source_timestamp),
                payload,
                created_at
            ],
            |row| row.get(0),
        )?;
        tracing::trace!(stream = %record.stream, id, key = %record.record_key, "enqueued");
        Ok(id)
    }

    /// Oldest unacknowledged rows of `stream`, by source timestamp.
    pub fn take_unacked_batch(&self, stream: Stream, max_n: usize) -> QueueResult<Vec<QueueRecord>> {
        let table = stream.table();
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, record_key, source_timestamp, payload, created_at, sent_to_server, acked_by_server
             FROM {table} WHERE acked_by_server = 0
             ORDER BY source_timestamp ASC, id ASC
             LIMIT ?1"
        ))?;
        let raw = stmt
            .query_map(params![max_n as i64], read_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(|r| decode(stream, r)).collect()
    }

    pub fn get(&self, stream: Stream, id: RecordId) -> QueueResult<Option<QueueRecord>> {
        let table = stream.table();
        let raw = self
            .conn()
            .query_row(
                &format!(
                    "SELECT id, record_key, source_timestamp, payload, created_at, sent_to_server, acked_by_server
                     FROM {table} WHERE id = ?1"
                ),
                params![id],
                read_raw,
            )
            .optional()?;
        raw.map(|r| decode(stream, r)).transpose()
    }

    /// Flag rows as handed to the transport. Informational only; delivery is
    /// decided by the acknowledged flag.
    pub fn mark_sent(&self, stream: Stream, ids: &[RecordId]) -> QueueResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = stream.table();
        let conn = self.conn();
        let n = conn.execute(
            &format!(
                "UPDATE {table} SET sent_to_server = 1 WHERE id IN ({})",
                placeholders(ids.len())
            ),
            params_from_iter(ids.iter()),
        )?;
        Ok(n)
    }

    /// Mark rows acknowledged by the remote side. Returns rows newly acked.
    pub fn mark_acked(&self, stream: Stream, scope: &AckScope) -> QueueResult<usize> {
        let table = stream.table();
        let conn = self.conn();
        let n = match scope {
            AckScope::Ids(ids) if ids.is_empty() => 0,
            AckScope::Ids(ids) => conn.execute(
                &format!(
                    "UPDATE {table} SET acked_by_server = 1, sent_to_server = 1
                     WHERE acked_by_server = 0 AND id IN ({})",
                    placeholders(ids.len())
                ),
                params_from_iter(ids.iter()),
            )?,
            AckScope::UpTo {
                record_key,
                timestamp,
            } => conn.execute(
                &format!(
                    "UPDATE {table} SET acked_by_server = 1, sent_to_server = 1
                     WHERE acked_by_server = 0 AND record_key = ?1 AND source_timestamp <= ?2"
                ),
                params![record_key, format_timestamp(*timestamp)],
            )?,
        };
        tracing::debug!(%stream, acked = n, "marked acknowledged");
        Ok(n)
    }

    pub fn count_unacked(&self, stream: Stream) -> QueueResult<u64> {
        let table = stream.table();
        let conn = self.conn();
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE acked_by_server = 0"),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Pending, in-flight and acknowledged counts for every stream.
    pub fn status(&self) -> QueueResult<Vec<StreamStatus>> {
        let conn = self.conn();
        let mut out = Vec::with_capacity(Stream::ALL.len());
        for stream in Stream::ALL {
            let table = stream.table();
            let (pending, in_flight, acked): (i64, i64, i64) = conn.query_row(
                &format!(
                    "SELECT
                        COALESCE(SUM(CASE WHEN acked_by_server = 0 AND sent_to_server = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN acked_by_server = 0 AND sent_to_server = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN acked_by_server = 1 THEN 1 ELSE 0 END), 0)
                     FROM {table}"
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            out.push(StreamStatus {
                stream,
                pending: pending as u64,
                in_flight: in_flight as u64,
                acked: acked as u64,
            });
        }
        Ok(out)
    }

    /// Delete acknowledged rows created more than `retention_days` ago.
    ///
    /// Unacknowledged rows are never pruned. A non-positive retention disables
    /// pruning.
    pub fn prune_acknowledged(&self, retention_days: f64) -> QueueResult<usize> {
        if !retention_days.is_finite() || retention_days <= 0.0 {
            return Ok(0);
        }
        let retention = ChronoDuration::seconds((retention_days * 86_400.0).round() as i64);
        let cutoff = format_timestamp(self.clock.now() - retention);
        let conn = self.conn();
        let mut removed = 0;
        for stream in Stream::ALL {
            let table = stream.table();
            removed += conn.execute(
                &format!("DELETE FROM {table} WHERE acked_by_server = 1 AND created_at < ?1"),
                params![cutoff],
            )?;
        }
        if removed > 0 {
            tracing::info!(removed, retention_days, "pruned acknowledged records");
        }
        Ok(removed)
    }

    /// Delete every record in every stream. Bring-up and debugging only.
    pub fn reset(&self) -> QueueResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for stream in Stream::ALL {
            removed += tx.execute(&format!("DELETE FROM {}", stream.table()), [])?;
        }
        tx.commit()?;
        tracing::warn!(removed, "local queue reset");
        Ok(removed)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        record_key: row.get(1)?,
        source_timestamp: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
        sent: row.get::<_, i64>(5)? != 0,
        acked: row.get::<_, i64>(6)? != 0,
    })
}

fn decode(stream: Stream, raw: RawRow) -> QueueResult<QueueRecord> {
    Ok(QueueRecord {
        id: raw.id,
        stream,
        record_key: raw.record_key,
        source_timestamp: parse_timestamp(&raw.source_timestamp)?,
        payload: serde_json::from_str(&raw.payload)?,
        created_at: parse_timestamp(&raw.created_at)?,
        sent: raw.sent,
        acked: raw.acked,
    })
}
