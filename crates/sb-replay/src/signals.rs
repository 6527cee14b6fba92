//! Replay as a [`SignalSource`].
//!
//! A pump trace row becomes a one-tick pulse of the matching input followed
//! by a release tick at the same timestamp:
//! `Auto Pump Start` pulses tank-full, `Manual Pump Start` pulses manual-start
//! and `Pump Stop` pulses tank-empty. Tank rows carry no pump inputs; they are
//! set aside for the caller to queue as tank readings.

use std::collections::VecDeque;

use sb_controls::{ControlResult, PumpEventKind, SignalSnapshot, SignalSource, SourceReading};
use sb_core::{Clock, SystemClock};

use crate::source::{ReplayEvent, ReplayPoll, ReplaySource};
use crate::trace::TraceRecord;

pub struct ReplaySignals<W: Clock = SystemClock> {
    source: ReplaySource<W>,
    pending: VecDeque<SignalSnapshot>,
    tank_rows: Vec<ReplayEvent>,
    emitted: Vec<ReplayEvent>,
}

impl<W: Clock> ReplaySignals<W> {
    pub fn new(source: ReplaySource<W>) -> Self {
        Self {
            source,
            pending: VecDeque::new(),
            tank_rows: Vec::new(),
            emitted: Vec::new(),
        }
    }

    pub fn source(&self) -> &ReplaySource<W> {
        &self.source
    }

    /// Tank rows emitted since the last call.
    pub fn take_tank_rows(&mut self) -> Vec<ReplayEvent> {
        std::mem::take(&mut self.tank_rows)
    }

    /// Every row emitted since the last call, in emission order.
    pub fn take_emitted(&mut self) -> Vec<ReplayEvent> {
        std::mem::take(&mut self.emitted)
    }

    /// Snapshots queued but not yet read.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn absorb(&mut self, rows: Vec<ReplayEvent>) {
        for row in rows {
            match &row.record {
                TraceRecord::Tank(_) => self.tank_rows.push(row.clone()),
                TraceRecord::Pump(sample) => match sample.kind.and_then(pulse_for) {
                    Some((p1, p2, p3)) => {
                        self.pending
                            .push_back(SignalSnapshot::new(row.timestamp, p1, p2, p3));
                        self.pending.push_back(SignalSnapshot::idle(row.timestamp));
                    }
                    None => tracing::warn!(
                        label = %sample.label,
                        stream = %row.stream_id,
                        "skipping pump row without a replayable event"
                    ),
                },
            }
            self.emitted.push(row);
        }
    }
}

/// Inputs asserted for one replayed pump event.
fn pulse_for(kind: PumpEventKind) -> Option<(bool, bool, bool)> {
    match kind {
        PumpEventKind::AutoPumpStart => Some((true, false, false)),
        PumpEventKind::ManualPumpStart => Some((false, true, false)),
        PumpEventKind::PumpStop => Some((false, false, true)),
        PumpEventKind::FatalError => None,
    }
}

impl<W: Clock> SignalSource for ReplaySignals<W> {
    fn read(&mut self) -> ControlResult<SourceReading> {
        if let Some(snap) = self.pending.pop_front() {
            return Ok(SourceReading::Fresh(snap));
        }
        match self.source.poll() {
            ReplayPoll::Rows(rows) => {
                self.absorb(rows);
                let snap = self
                    .pending
                    .pop_front()
                    .unwrap_or_else(|| SignalSnapshot::idle(self.source.clock().now()));
                Ok(SourceReading::Fresh(snap))
            }
            ReplayPoll::Idle | ReplayPoll::LoopPending { .. } => Ok(SourceReading::Fresh(
                SignalSnapshot::idle(self.source.clock().now()),
            )),
            ReplayPoll::EndOfData => Ok(SourceReading::EndOfData),
        }
    }
}
