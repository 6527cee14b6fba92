//! Multi-stream replay with looping.
//!
//! Each enabled stream has a [`ReplayCursor`]. On every poll the source reads
//! virtual now and emits, in timestamp order across streams, every row whose
//! rebased timestamp has been reached. Ties break by stream order, then row
//! order.
//!
//! Loop `k` places trace time `t` at `epoch_k + (t - trace_start)`. When all
//! cursors are exhausted and looping is on, the source waits out the gap, picks
//! a new epoch no earlier than virtual now and strictly after the last emitted
//! row, rebases the clock onto it and rewinds every cursor.

use std::sync::Arc;

use chrono::Duration;
use sb_core::{Clock, SystemClock, Timestamp};
use serde::{Deserialize, Serialize};

use crate::clock::VirtualClock;
use crate::trace::{StreamTrace, TraceRecord};
use crate::{ReplayError, ReplayResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub multiplier: f64,
    pub loop_enabled: bool,
    /// Pause between loops, in wall seconds.
    pub loop_gap_s: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            multiplier: 4.0,
            loop_enabled: true,
            loop_gap_s: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayCursor {
    pub stream_id: String,
    pub next_row_index: usize,
    pub exhausted: bool,
}

/// One emitted row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayEvent {
    pub stream_id: String,
    pub stream_index: usize,
    pub row_index: usize,
    pub loop_index: u32,
    /// Rebased timestamp, in virtual time.
    pub timestamp: Timestamp,
    pub record: TraceRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayPoll {
    Rows(Vec<ReplayEvent>),
    /// Nothing due yet.
    Idle,
    /// All streams done; the next loop starts once virtual time reaches `resume_at`.
    LoopPending { resume_at: Timestamp },
    EndOfData,
}

pub struct ReplaySource<W: Clock = SystemClock> {
    traces: Vec<StreamTrace>,
    cursors: Vec<ReplayCursor>,
    clock: Arc<VirtualClock<W>>,
    config: ReplayConfig,
    trace_start: Timestamp,
    epoch: Timestamp,
    loop_index: u32,
    last_emitted: Option<Timestamp>,
    gap_started: Option<Timestamp>,
}

impl<W: Clock> ReplaySource<W> {
    /// Build a source over `traces` with a clock reading `wall`.
    ///
    /// The clock's origin is the earliest first-row timestamp across traces.
    ///
    /// # Errors
    ///
    /// `Empty` when no trace has rows; `InvalidArg` for a bad multiplier or a
    /// negative or non-finite loop gap.
    pub fn new(traces: Vec<StreamTrace>, config: ReplayConfig, wall: W) -> ReplayResult<Self> {
        if !config.loop_gap_s.is_finite() || config.loop_gap_s < 0.0 {
            return Err(ReplayError::InvalidArg {
                what: "loop_gap_s must be a non-negative number",
            });
        }
        let trace_start = traces
            .iter()
            .filter_map(StreamTrace::first_timestamp)
            .min()
            .ok_or(ReplayError::Empty)?;
        let clock = Arc::new(VirtualClock::new(trace_start, config.multiplier, wall)?);
        let cursors = traces.iter().map(fresh_cursor).collect();
        tracing::info!(
            streams = traces.len(),
            start = %trace_start,
            multiplier = config.multiplier,
            looping = config.loop_enabled,
            "replay source ready"
        );
        Ok(Self {
            traces,
            cursors,
            clock,
            config,
            trace_start,
            epoch: trace_start,
            loop_index: 0,
            last_emitted: None,
            gap_started: None,
        })
    }

    pub fn clock(&self) -> Arc<VirtualClock<W>> {
        self.clock.clone()
    }

    pub fn cursors(&self) -> &[ReplayCursor] {
        &self.cursors
    }

    pub fn trace_start(&self) -> Timestamp {
        self.trace_start
    }

    pub fn loop_index(&self) -> u32 {
        self.loop_index
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Virtual time at which the next row becomes due, if any remain this loop.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.peek().map(|(ts, _)| ts)
    }

    /// Emit everything due at the clock's current virtual time.
    pub fn poll(&mut self) -> ReplayPoll {
        let mut now = self.clock.now();
        if self.all_exhausted() {
            if !self.config.loop_enabled {
                return ReplayPoll::EndOfData;
            }
            let gap = Duration::microseconds(
                (self.config.loop_gap_s * self.config.multiplier * 1e6).round() as i64,
            );
            let resume_at = *self.gap_started.get_or_insert(now) + gap;
            if now < resume_at {
                return ReplayPoll::LoopPending { resume_at };
            }
            self.start_next_loop(now);
            now = self.clock.now();
        }

        let mut rows = Vec::new();
        while let Some((ts, idx)) = self.peek() {
            if ts > now {
                break;
            }
            rows.push(self.emit(idx, ts));
        }
        if rows.is_empty() {
            ReplayPoll::Idle
        } else {
            ReplayPoll::Rows(rows)
        }
    }

    fn all_exhausted(&self) -> bool {
        self.cursors.iter().all(|c| c.exhausted)
    }

    fn rebased(&self, row_ts: Timestamp) -> Timestamp {
        self.epoch + (row_ts - self.trace_start)
    }

    /// Earliest pending row as (rebased timestamp, stream index).
    fn peek(&self) -> Option<(Timestamp, usize)> {
        self.cursors
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.exhausted)
            .map(|(i, c)| (self.rebased(self.traces[i].rows[c.next_row_index].timestamp), i))
            .min()
    }

    fn emit(&mut self, stream_index: usize, timestamp: Timestamp) -> ReplayEvent {
        let trace = &self.traces[stream_index];
        let cursor = &mut self.cursors[stream_index];
        let row_index = cursor.next_row_index;
        cursor.next_row_index += 1;
        cursor.exhausted = cursor.next_row_index >= trace.rows.len();
        self.last_emitted = Some(timestamp);
        ReplayEvent {
            stream_id: trace.id.clone(),
            stream_index,
            row_index,
            loop_index: self.loop_index,
            timestamp,
            record: trace.rows[row_index].record.clone(),
        }
    }

    fn start_next_loop(&mut self, now: Timestamp) {
        let floor = self
            .last_emitted
            .map(|ts| ts + Duration::milliseconds(1))
            .unwrap_or(now);
        self.epoch = now.max(floor);
        self.clock.rebase(self.epoch);
        self.cursors = self.traces.iter().map(fresh_cursor).collect();
        self.gap_started = None;
        self.loop_index += 1;
        tracing::info!(loop_index = self.loop_index, epoch = %self.epoch, "replay loop restarted");
    }
}

fn fresh_cursor(trace: &StreamTrace) -> ReplayCursor {
    ReplayCursor {
        stream_id: trace.id.clone(),
        next_row_index: 0,
        exhausted: trace.rows.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{StreamKind, TankSample, TraceRow};
    use chrono::{TimeZone, Utc};
    use sb_core::ManualClock;

    fn t(secs: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn tank(id: &str, secs: &[i64]) -> StreamTrace {
        StreamTrace::new(
            id,
            StreamKind::Tank,
            secs.iter()
                .map(|s| TraceRow {
                    timestamp: t(*s),
                    record: TraceRecord::Tank(TankSample {
                        tank_id: id.to_string(),
                        surf_dist: None,
                        depth: None,
                        gal: Some(*s as f64),
                    }),
                })
                .collect(),
        )
    }

    #[test]
    fn origin_is_earliest_first_row() {
        let wall = Arc::new(ManualClock::new(t(10_000)));
        let src = ReplaySource::new(
            vec![tank("a", &[20, 30]), tank("b", &[5, 40])],
            ReplayConfig::default(),
            wall,
        )
        .unwrap();
        assert_eq!(src.trace_start(), t(5));
        assert_eq!(src.clock().origin(), t(5));
    }

    #[test]
    fn merges_streams_in_time_order() {
        let wall = Arc::new(ManualClock::new(t(10_000)));
        let mut src = ReplaySource::new(
            vec![tank("a", &[0, 20, 30]), tank("b", &[10, 20])],
            ReplayConfig {
                multiplier: 10.0,
                loop_enabled: false,
                loop_gap_s: 0.0,
            },
            wall.clone(),
        )
        .unwrap();

        let ReplayPoll::Rows(first) = src.poll() else {
            panic!("expected first row");
        };
        assert_eq!(first.len(), 1);
        assert_eq!(src.poll(), ReplayPoll::Idle);

        wall.advance(Duration::seconds(2));
        let ReplayPoll::Rows(rows) = src.poll() else {
            panic!("expected rows");
        };
        let order: Vec<_> = rows.iter().map(|r| (r.stream_id.as_str(), r.timestamp)).collect();
        assert_eq!(order, vec![("b", t(10)), ("a", t(20)), ("b", t(20))]);

        wall.advance(Duration::seconds(1));
        assert!(matches!(src.poll(), ReplayPoll::Rows(r) if r.len() == 1));
        assert_eq!(src.poll(), ReplayPoll::EndOfData);
        assert!(src.cursors().iter().all(|c| c.exhausted));
    }

    #[test]
    fn empty_traces_are_rejected() {
        let wall = Arc::new(ManualClock::new(t(0)));
        assert!(matches!(
            ReplaySource::new(vec![tank("a", &[])], ReplayConfig::default(), wall),
            Err(ReplayError::Empty)
        ));
    }

    #[test]
    fn loop_waits_for_gap_then_moves_forward() {
        let wall = Arc::new(ManualClock::new(t(10_000)));
        let mut src = ReplaySource::new(
            vec![tank("a", &[0, 10])],
            ReplayConfig {
                multiplier: 2.0,
                loop_enabled: true,
                loop_gap_s: 3.0,
            },
            wall.clone(),
        )
        .unwrap();
        wall.advance(Duration::seconds(5));
        assert!(matches!(src.poll(), ReplayPoll::Rows(r) if r.len() == 2));

        // gap is 3 wall seconds = 6 virtual seconds from exhaustion
        assert_eq!(
            src.poll(),
            ReplayPoll::LoopPending { resume_at: t(16) }
        );
        wall.advance(Duration::seconds(3));
        let ReplayPoll::Rows(rows) = src.poll() else {
            panic!("expected loop restart");
        };
        assert_eq!(src.loop_index(), 1);
        assert_eq!(rows[0].loop_index, 1);
        assert_eq!(rows[0].timestamp, t(16));
        assert!(rows[0].timestamp > t(10));
    }
}
