//! The sync worker.
//!
//! One worker serves every stream on its own timer, independent of the pump
//! controller's tick loop. A pass over a stream takes the oldest
//! unacknowledged rows, posts them, and acknowledges what the response
//! confirms. Failures are logged and retried on the next interval.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::Duration;
use sb_core::{Clock, Timestamp, sleep_unless_stopped};
use sb_queue::{AckScope, QueueStore, Stream};

use crate::protocol::{IngestBody, acked_ids};
use crate::transport::IngestTransport;
use crate::{SyncError, SyncResult};

/// Upload cadence for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSchedule {
    pub stream: Stream,
    pub batch_size: usize,
    pub interval: Duration,
    /// Sync as soon as rows appear instead of waiting for the interval.
    pub immediate: bool,
    pub max_batches_per_pass: usize,
}

impl StreamSchedule {
    pub fn periodic(stream: Stream, batch_size: usize, interval_s: f64) -> Self {
        Self {
            stream,
            batch_size,
            interval: secs(interval_s),
            immediate: false,
            max_batches_per_pass: 4,
        }
    }

    /// Pump events: one record per post, sent as soon as it is queued.
    pub fn pump_events(interval_s: f64) -> Self {
        Self {
            stream: Stream::Pump,
            batch_size: 1,
            interval: secs(interval_s),
            immediate: true,
            max_batches_per_pass: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncWorkerConfig {
    pub streams: Vec<StreamSchedule>,
    /// Heartbeat after the pump stream has been idle this long.
    pub heartbeat_interval: Option<Duration>,
    /// Sleep between scheduling checks in [`SyncWorker::run`].
    pub poll_interval: StdDuration,
}

impl SyncWorkerConfig {
    pub fn validate(&self) -> SyncResult<()> {
        for s in &self.streams {
            if s.batch_size == 0 {
                return Err(SyncError::InvalidArg {
                    what: "batch_size must be at least 1",
                });
            }
            if s.stream == Stream::Pump && s.batch_size != 1 {
                return Err(SyncError::InvalidArg {
                    what: "pump stream batch_size must be 1",
                });
            }
            if s.interval <= Duration::zero() {
                return Err(SyncError::InvalidArg {
                    what: "upload interval must be positive",
                });
            }
            if s.max_batches_per_pass == 0 {
                return Err(SyncError::InvalidArg {
                    what: "max_batches_per_pass must be at least 1",
                });
            }
        }
        Ok(())
    }
}

/// Outcome of one pass over one stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub batches: usize,
    pub sent: usize,
    pub acked: usize,
    pub failure: Option<String>,
}

pub struct SyncWorker<'a, T: IngestTransport, C: Clock> {
    store: &'a QueueStore,
    transport: T,
    clock: C,
    config: SyncWorkerConfig,
    next_due: BTreeMap<Stream, Timestamp>,
    last_pump_activity: Timestamp,
}

impl<'a, T: IngestTransport, C: Clock> SyncWorker<'a, T, C> {
    pub fn new(
        store: &'a QueueStore,
        transport: T,
        clock: C,
        config: SyncWorkerConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            store,
            transport,
            clock,
            config,
            next_due: BTreeMap::new(),
            last_pump_activity: now,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Sync every configured stream once, regardless of schedule.
    pub fn flush_all(&mut self, label: &str) -> SyncResult<BTreeMap<Stream, PassReport>> {
        let mut pending = Vec::new();
        for s in &self.config.streams {
            pending.push((s.stream, self.store.count_unacked(s.stream)?));
        }
        tracing::info!(label, ?pending, "starting upload flush");

        let now = self.clock.now();
        let mut reports = BTreeMap::new();
        for schedule in self.config.streams.clone() {
            let report = self.sync_stream(&schedule)?;
            self.next_due.insert(schedule.stream, now + schedule.interval);
            reports.insert(schedule.stream, report);
        }
        Ok(reports)
    }

    /// Sync streams that are due at the clock's current time, then heartbeat
    /// if the pump stream has been idle long enough.
    pub fn run_pending(&mut self) -> SyncResult<BTreeMap<Stream, PassReport>> {
        let now = self.clock.now();
        let mut reports = BTreeMap::new();
        for schedule in self.config.streams.clone() {
            let due = self
                .next_due
                .get(&schedule.stream)
                .is_none_or(|due| now >= *due);
            let urgent = schedule.immediate && self.store.count_unacked(schedule.stream)? > 0;
            if !(due || urgent) {
                continue;
            }
            let report = self.sync_stream(&schedule)?;
            self.next_due.insert(schedule.stream, now + schedule.interval);
            reports.insert(schedule.stream, report);
        }
        self.maybe_heartbeat(now)?;
        Ok(reports)
    }

    /// Run until `stop` is set. Performs a full flush first.
    ///
    /// Only storage exhaustion ends the loop. Any other failure is logged and
    /// the pass is retried after the poll interval.
    pub fn run(&mut self, stop: &AtomicBool) -> SyncResult<()> {
        let mut pass = self.flush_all("startup");
        loop {
            retry_unless_exhausted(pass)?;
            sleep_unless_stopped(self.config.poll_interval, stop);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            pass = self.run_pending();
        }
        tracing::info!("sync worker stopped");
        Ok(())
    }

    /// Ask the remote side to discard this device's records.
    pub fn request_remote_reset(&mut self) -> SyncResult<()> {
        self.transport.request_reset()
    }

    fn sync_stream(&mut self, schedule: &StreamSchedule) -> SyncResult<PassReport> {
        let stream = schedule.stream;
        let mut report = PassReport::default();
        for _ in 0..schedule.max_batches_per_pass {
            let batch = self.store.take_unacked_batch(stream, schedule.batch_size)?;
            if batch.is_empty() {
                break;
            }
            let ids: Vec<_> = batch.iter().map(|r| r.id).collect();
            self.store.mark_sent(stream, &ids)?;
            report.batches += 1;
            report.sent += batch.len();

            let body = IngestBody::from_records(&batch);
            let acked = match self
                .transport
                .send_batch(stream, &body)
                .and_then(|resp| acked_ids(&batch, &resp))
            {
                Ok(acked) => acked,
                Err(err) if err.is_retryable() => {
                    tracing::warn!(%stream, %err, rows = batch.len(), "upload failed, will retry");
                    report.failure = Some(err.to_string());
                    break;
                }
                Err(err) => return Err(err),
            };

            let n = self.store.mark_acked(stream, &AckScope::Ids(acked))?;
            report.acked += n;
            if stream == Stream::Pump && n > 0 {
                self.last_pump_activity = self.clock.now();
            }
            tracing::info!(%stream, sent = batch.len(), acked = n, "uploaded batch");
            if n == 0 || batch.len() < schedule.batch_size {
                break;
            }
        }
        if report.acked > 0 {
            let remaining = self.store.count_unacked(stream)?;
            if remaining > 0 {
                tracing::info!(%stream, remaining, "queue pending after upload");
            }
        }
        Ok(report)
    }

    fn maybe_heartbeat(&mut self, now: Timestamp) -> SyncResult<()> {
        let Some(interval) = self.config.heartbeat_interval else {
            return Ok(());
        };
        if now - self.last_pump_activity < interval {
            return Ok(());
        }
        if self.store.count_unacked(Stream::Pump)? > 0 {
            return Ok(());
        }
        match self.transport.send_heartbeat(Stream::Pump) {
            Ok(()) => tracing::debug!("pump heartbeat sent"),
            Err(err) => tracing::warn!(%err, "pump heartbeat failed"),
        }
        self.last_pump_activity = now;
        Ok(())
    }
}

/// Swallow a failed pass unless the queue is out of space.
pub fn retry_unless_exhausted<T>(pass: SyncResult<T>) -> SyncResult<Option<T>> {
    match pass {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_storage_exhausted() => {
            tracing::error!(%err, "local storage exhausted");
            Err(err)
        }
        Err(err) => {
            tracing::warn!(%err, "sync pass failed, will retry");
            Ok(None)
        }
    }
}

fn secs(s: f64) -> Duration {
    Duration::milliseconds((s * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_queue::QueueError;

    fn sqlite(code: std::ffi::c_int) -> SyncError {
        let err = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None);
        SyncError::Queue(QueueError::from(err))
    }

    #[test]
    fn busy_queue_is_retried_and_full_disk_is_not() {
        let busy: SyncResult<()> = Err(sqlite(rusqlite::ffi::SQLITE_BUSY));
        assert_eq!(retry_unless_exhausted(busy).unwrap(), None);

        let full: SyncResult<()> = Err(sqlite(rusqlite::ffi::SQLITE_FULL));
        assert!(retry_unless_exhausted(full).unwrap_err().is_storage_exhausted());

        assert_eq!(retry_unless_exhausted(Ok(3)).unwrap(), Some(3));
    }
}
