//! The pump controller service.
//!
//! One cooperative loop: read a snapshot, advance the pump authority, queue
//! what it reported, then drive the relay. Sources that cannot vouch for
//! their data report staleness, which the authority escalates like any
//! other error. Every exit path leaves the relay forced off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::Duration;
use sb_config::{ControllerDef, RelayDef};
use sb_controls::{
    DomainEvent, FileRelay, HoldDetector, LoggingRelay, PumpAuthority, PumpAuthorityConfig, Relay,
    RelayGuard, Severity, SignalSource, SourceReading, TickOutcome, aux,
};
use sb_core::{Clock, Timestamp, sleep_unless_stopped};
use sb_queue::{NewRecord, QueueStore};

use crate::error::{AppError, AppResult};
use crate::notices::NoticeSuppressor;
use crate::records::{self, CONTROLLER_SOURCE};

/// Which time a fresh snapshot is ticked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTime {
    /// The service clock at the start of the tick.
    Clock,
    /// The snapshot's own timestamp; replay uses this so queued rows carry
    /// trace time.
    Signal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub authority: PumpAuthorityConfig,
    pub control_hold_s: f64,
    pub notice_suppress_s: f64,
    pub tick_interval: StdDuration,
    pub tick_time: TickTime,
}

impl ControllerSettings {
    pub fn from_config(def: &ControllerDef) -> Self {
        Self {
            authority: PumpAuthorityConfig {
                error_threshold: def.error_threshold,
                reserve_volume_gal: def.reserve_volume_gal,
            },
            control_hold_s: def.control_hold_s,
            notice_suppress_s: def.notice_suppress_s,
            tick_interval: StdDuration::from_secs_f64(def.tick_interval_s),
            tick_time: TickTime::Clock,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&ControllerDef::default())
    }
}

/// Result of one [`ControllerService::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Ticked(TickOutcome),
    /// The source has nothing more to give.
    EndOfData,
}

pub fn build_relay(def: &RelayDef) -> Box<dyn Relay + Send> {
    match def {
        RelayDef::Logging => Box::new(LoggingRelay::new()),
        RelayDef::File { path, active_high } => Box::new(FileRelay::new(path.clone(), *active_high)),
    }
}

pub struct ControllerService<'a, S: SignalSource, R: Relay, C: Clock> {
    store: &'a QueueStore,
    source: S,
    relay: RelayGuard<R>,
    clock: C,
    authority: PumpAuthority,
    clear_hold: HoldDetector,
    notices: NoticeSuppressor,
    settings: ControllerSettings,
    ticks: u64,
}

impl<'a, S: SignalSource, R: Relay, C: Clock> ControllerService<'a, S, R, C> {
    /// Start cold: `NotPumping`, zero error count, relay forced off.
    pub fn new(
        store: &'a QueueStore,
        source: S,
        relay: R,
        clock: C,
        settings: ControllerSettings,
    ) -> AppResult<Self> {
        let authority = PumpAuthority::new(settings.authority)?;
        let mut relay = RelayGuard::new(relay);
        relay.force_off()?;
        tracing::info!(
            threshold = settings.authority.error_threshold,
            reserve_gal = settings.authority.reserve_volume_gal,
            "pump controller starting in not pumping"
        );
        Ok(Self {
            store,
            source,
            relay,
            clock,
            authority,
            clear_hold: HoldDetector::new(settings.control_hold_s),
            notices: NoticeSuppressor::new(settings.notice_suppress_s),
            settings,
            ticks: 0,
        })
    }

    pub fn authority(&self) -> &PumpAuthority {
        &self.authority
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// A queue write that fails, a failing signal source, or a relay that
    /// cannot be driven. The relay has been forced off before any error returns.
    pub fn step(&mut self) -> AppResult<StepOutcome> {
        let clock_now = self.clock.now();
        let reading = match self.source.read() {
            Ok(reading) => reading,
            Err(err) => {
                tracing::error!(%err, "signal source failed");
                self.force_off();
                return Err(err.into());
            }
        };

        let mut events = Vec::new();
        let (now, outcome) = match reading {
            SourceReading::Fresh(snapshot) => {
                let now = match self.settings.tick_time {
                    TickTime::Clock => clock_now,
                    TickTime::Signal => snapshot.timestamp,
                };
                let clear = snapshot.aux_flag(aux::CLEAR_FATAL);
                if self.clear_hold.update(clear, now) && self.authority.is_latched() {
                    events.extend(self.authority.clear_fatal(now));
                }
                (now, self.authority.tick(snapshot, now))
            }
            SourceReading::Stale { reason } => {
                tracing::warn!(%reason, "signal snapshot stale");
                (clock_now, self.authority.tick_stale(clock_now, &reason))
            }
            SourceReading::EndOfData => {
                tracing::info!(ticks = self.ticks, "signal source finished");
                self.force_off();
                return Ok(StepOutcome::EndOfData);
            }
        };
        events.extend(outcome.events);

        if let Err(err) = self.record(&events, now) {
            self.force_off();
            return Err(err);
        }
        if let Err(err) = self.relay.apply(outcome.command) {
            tracing::error!(%err, "failed to drive pump relay");
            self.force_off();
            return Err(err.into());
        }
        self.ticks += 1;
        Ok(StepOutcome::Ticked(TickOutcome {
            state: outcome.state,
            events,
            command: outcome.command,
        }))
    }

    /// Tick at the configured cadence until `stop` is set or the source ends.
    pub fn run(&mut self, stop: &AtomicBool) -> AppResult<u64> {
        while !stop.load(Ordering::Relaxed) {
            if self.step()? == StepOutcome::EndOfData {
                break;
            }
            sleep_unless_stopped(self.settings.tick_interval, stop);
        }
        self.force_off();
        tracing::info!(ticks = self.ticks, "pump controller stopped");
        Ok(self.ticks)
    }

    fn force_off(&mut self) {
        if let Err(err) = self.relay.force_off() {
            tracing::error!(%err, "failed to force pump relay off");
        }
    }

    /// Queue pump events and notices. Any queue failure is returned so the
    /// tick stops before the relay is driven.
    fn record(&mut self, events: &[DomainEvent], now: Timestamp) -> AppResult<()> {
        let latched = self.authority.is_latched();
        let mut notices = 0;
        for event in events {
            let record = match event {
                DomainEvent::PumpEvent(pump) => {
                    tracing::info!(
                        event = pump.kind.as_str(),
                        run_time_s = ?pump.run_time_s,
                        gph = ?pump.gallons_per_hour,
                        "pump event"
                    );
                    Some(records::pump_record(pump))
                }
                DomainEvent::FatalCleared => {
                    notices += 1;
                    Some(self.notice_record(
                        Severity::Warning,
                        "Fatal latch cleared",
                        now,
                        notices,
                        false,
                    ))
                }
                other => match other.notice() {
                    Some((severity, message)) => {
                        if self.notices.is_new(message) {
                            log_notice(severity, message);
                        }
                        if self.notices.admit(message, now) {
                            notices += 1;
                            Some(self.notice_record(severity, message, now, notices, latched))
                        } else {
                            None
                        }
                    }
                    None => None,
                },
            };
            if let Some(record) = record {
                self.enqueue(&record)?;
            }
        }
        Ok(())
    }

    /// Notices raised in the same tick get distinct source timestamps.
    fn notice_record(
        &self,
        severity: Severity,
        message: &str,
        now: Timestamp,
        nth: i64,
        latched: bool,
    ) -> NewRecord {
        let message = if latched {
            records::with_fatal_prefix(message)
        } else {
            message.to_string()
        };
        let at = now + Duration::microseconds(nth - 1);
        records::error_record(CONTROLLER_SOURCE, severity, &message, at)
    }

    fn enqueue(&self, record: &NewRecord) -> AppResult<()> {
        self.store.enqueue(record).map(|_| ()).map_err(|err| {
            if err.is_storage_exhausted() {
                tracing::error!(%err, stream = %record.stream, "local storage exhausted");
            } else {
                tracing::error!(%err, stream = %record.stream, "failed to queue record");
            }
            AppError::from(err)
        })
    }
}

fn log_notice(severity: Severity, message: &str) {
    match severity {
        Severity::Warning => tracing::warn!("{message}"),
        Severity::Error => tracing::error!("{message}"),
        Severity::Fatal => tracing::error!(fatal = true, "{message}"),
    }
}
