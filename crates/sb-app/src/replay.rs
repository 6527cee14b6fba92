//! Replay pipeline.
//!
//! Recorded traces drive the same controller and queue code as live
//! signals: pump rows become input pulses for the pump authority, tank rows
//! are queued as tank readings, and an optional sync worker uploads on the
//! virtual clock. Every emitted row also feeds a SHA-256 digest so two runs
//! over the same traces can be compared.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use sb_config::{DeviceConfig, ReplayDef, ReplayStreamKind};
use sb_controls::{LoggingRelay, Relay};
use sb_core::{Clock, SystemClock, format_timestamp, sleep_unless_stopped};
use sb_queue::QueueStore;
use sb_replay::{
    ReplayConfig, ReplayEvent, ReplaySignals, ReplaySource, StreamKind, StreamTrace, TraceRecord,
    VirtualClock,
};
use sb_sync::{IngestTransport, SyncWorker};
use sha2::{Digest, Sha256};

use crate::controller::{ControllerService, ControllerSettings, StepOutcome, TickTime};
use crate::error::{AppError, AppResult};
use crate::records;
use crate::sync_service::build_worker_config;

/// Command-line adjustments on top of the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayOverrides {
    pub multiplier: Option<f64>,
    pub loop_enabled: Option<bool>,
}

impl ReplayOverrides {
    pub fn apply(&self, def: &ReplayDef) -> ReplayConfig {
        ReplayConfig {
            multiplier: self.multiplier.unwrap_or(def.multiplier),
            loop_enabled: self.loop_enabled.unwrap_or(def.loop_enabled),
            loop_gap_s: def.loop_gap_s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    pub ticks: u64,
    pub rows: u64,
    pub tank_rows: u64,
    pub pump_rows: u64,
    pub loops: u32,
    /// Hex SHA-256 over every emitted row, in emission order.
    pub digest: String,
    pub cancelled: bool,
}

/// Load every enabled stream.
pub fn load_traces(def: &ReplayDef) -> AppResult<Vec<StreamTrace>> {
    let mut traces = Vec::new();
    for stream in def.streams.iter().filter(|s| s.enabled) {
        let kind = match stream.kind {
            ReplayStreamKind::Tank => StreamKind::Tank,
            ReplayStreamKind::Pump => StreamKind::Pump,
        };
        traces.push(StreamTrace::load(&stream.id, kind, &stream.path)?);
    }
    if traces.is_empty() {
        return Err(AppError::InvalidInput(
            "no enabled replay streams".to_string(),
        ));
    }
    Ok(traces)
}

pub struct ReplayPipeline<'a, W: Clock, R: Relay> {
    store: &'a QueueStore,
    controller: ControllerService<'a, ReplaySignals<W>, R, Arc<VirtualClock<W>>>,
    clock: Arc<VirtualClock<W>>,
    hasher: Sha256,
    summary: ReplaySummary,
}

impl<'a, W: Clock, R: Relay> ReplayPipeline<'a, W, R> {
    pub fn new(
        store: &'a QueueStore,
        traces: Vec<StreamTrace>,
        replay: ReplayConfig,
        wall: W,
        relay: R,
        mut settings: ControllerSettings,
    ) -> AppResult<Self> {
        let source = ReplaySource::new(traces, replay, wall)?;
        let clock = source.clock();
        settings.tick_time = TickTime::Signal;
        let controller = ControllerService::new(
            store,
            ReplaySignals::new(source),
            relay,
            clock.clone(),
            settings,
        )?;
        Ok(Self {
            store,
            controller,
            clock,
            hasher: Sha256::new(),
            summary: ReplaySummary::default(),
        })
    }

    pub fn clock(&self) -> Arc<VirtualClock<W>> {
        self.clock.clone()
    }

    pub fn controller(&self) -> &ControllerService<'a, ReplaySignals<W>, R, Arc<VirtualClock<W>>> {
        &self.controller
    }

    /// One controller tick plus the tank rows and digest lines it produced.
    ///
    /// Returns false once the replay has ended.
    pub fn step(&mut self) -> AppResult<bool> {
        let outcome = self.controller.step()?;
        for row in self.controller.source_mut().take_tank_rows() {
            if let TraceRecord::Tank(sample) = &row.record {
                self.store
                    .enqueue(&records::tank_record(sample, row.timestamp))?;
            }
        }
        for row in self.controller.source_mut().take_emitted() {
            self.absorb(&row)?;
        }
        if outcome == StepOutcome::EndOfData {
            return Ok(false);
        }
        self.summary.ticks += 1;
        Ok(true)
    }

    /// Summary so far, with the digest of everything emitted.
    pub fn summary(&self) -> ReplaySummary {
        ReplaySummary {
            loops: self.controller.source().source().loop_index(),
            digest: format!("{:x}", self.hasher.clone().finalize()),
            ..self.summary.clone()
        }
    }

    fn absorb(&mut self, row: &ReplayEvent) -> AppResult<()> {
        let record = serde_json::to_string(&row.record)?;
        let line = format!(
            "{}|{}|{}|{}|{}\n",
            row.stream_id,
            row.row_index,
            row.loop_index,
            format_timestamp(row.timestamp),
            record
        );
        self.hasher.update(line.as_bytes());
        self.summary.rows += 1;
        match row.record {
            TraceRecord::Tank(_) => self.summary.tank_rows += 1,
            TraceRecord::Pump(_) => self.summary.pump_rows += 1,
        }
        Ok(())
    }
}

/// Run the configured replay on the wall clock until the traces end or
/// `stop` is set.
///
/// With a transport, a sync worker uploads on the virtual clock in its own
/// thread so network calls never hold up ticks. The relay only logs.
pub fn run_replay<T: IngestTransport + Send>(
    config: &DeviceConfig,
    store: &QueueStore,
    overrides: ReplayOverrides,
    transport: Option<T>,
    stop: &AtomicBool,
) -> AppResult<ReplaySummary> {
    let traces = load_traces(&config.replay)?;
    let replay = overrides.apply(&config.replay);
    let settings = ControllerSettings::from_config(&config.controller);
    let mut pipeline =
        ReplayPipeline::new(store, traces, replay, SystemClock, LoggingRelay::new(), settings)?;
    let tick = StdDuration::from_secs_f64(config.replay.tick_interval_s);
    tracing::info!(
        multiplier = replay.multiplier,
        looping = replay.loop_enabled,
        upload = transport.is_some(),
        "replay starting"
    );

    let Some(transport) = transport else {
        return drive(&mut pipeline, tick, stop);
    };

    let clock = pipeline.clock();
    let worker_config = build_worker_config(&config.sync);
    let sync_stop = AtomicBool::new(false);
    std::thread::scope(|scope| {
        let uploader = scope.spawn(|| -> AppResult<()> {
            let mut worker = SyncWorker::new(store, transport, clock, worker_config)?;
            worker.run(&sync_stop)?;
            worker.flush_all("replay finished")?;
            Ok(())
        });
        let result = drive(&mut pipeline, tick, stop);
        sync_stop.store(true, Ordering::Relaxed);
        let uploaded = uploader
            .join()
            .unwrap_or_else(|_| Err(AppError::Sync("upload thread panicked".to_string())));
        let summary = result?;
        uploaded?;
        Ok(summary)
    })
}

fn drive<W: Clock, R: Relay>(
    pipeline: &mut ReplayPipeline<'_, W, R>,
    tick: StdDuration,
    stop: &AtomicBool,
) -> AppResult<ReplaySummary> {
    let mut cancelled = false;
    loop {
        if stop.load(Ordering::Relaxed) {
            cancelled = true;
            break;
        }
        if !pipeline.step()? {
            break;
        }
        sleep_unless_stopped(tick, stop);
    }
    let summary = ReplaySummary {
        cancelled,
        ..pipeline.summary()
    };
    tracing::info!(
        ticks = summary.ticks,
        rows = summary.rows,
        loops = summary.loops,
        cancelled,
        digest = %summary.digest,
        "replay finished"
    );
    Ok(summary)
}
