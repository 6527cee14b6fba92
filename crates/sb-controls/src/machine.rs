//! The pump authority state machine.
//!
//! [`PumpAuthority::tick`] is the sole decision point for the pump relay. Each
//! tick first checks the fatal latch, then looks up the transition for the
//! snapshot's inputs and applies its counter effect, notice, state change and
//! session action, in that order.

use sb_core::{Timestamp, seconds_between};
use serde::{Deserialize, Serialize};

use crate::actuator::ActuatorCommand;
use crate::error::{ControlError, ControlResult};
use crate::events::{DomainEvent, PumpEvent, PumpEventKind, Severity};
use crate::signal::SignalSnapshot;
use crate::state::{ErrorCounter, PumpSession, PumpState};
use crate::transition::{
    CounterEffect, Notice, OperatingState, SessionAction, TransitionKey, TransitionTable,
};

/// Message carried by the fatal stop event.
pub const FATAL_STOP_MESSAGE: &str = "FATAL ERROR: STOPPING";

/// Gallons drained from the tank between the full and empty switches.
pub const DEFAULT_RESERVE_VOLUME_GAL: f64 = 12.18;

/// Consecutive erroneous ticks tolerated before latching.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 30;

/// Tunables for [`PumpAuthority`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpAuthorityConfig {
    pub error_threshold: u32,
    pub reserve_volume_gal: f64,
}

impl Default for PumpAuthorityConfig {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            reserve_volume_gal: DEFAULT_RESERVE_VOLUME_GAL,
        }
    }
}

/// What one tick decided.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub state: PumpState,
    pub events: Vec<DomainEvent>,
    pub command: ActuatorCommand,
}

/// Pump state, error counter and session timing, advanced one snapshot at a time.
///
/// Nothing here reads a clock: callers pass `now` so that live and replayed
/// runs share the same code path.
#[derive(Debug, Clone)]
pub struct PumpAuthority {
    config: PumpAuthorityConfig,
    table: TransitionTable,
    state: PumpState,
    counter: ErrorCounter,
    session: PumpSession,
}

impl PumpAuthority {
    /// Create a machine in `NotPumping` with a zero error count.
    ///
    /// # Errors
    ///
    /// Returns error if the threshold is zero or the reserve volume is not a
    /// positive finite number.
    pub fn new(config: PumpAuthorityConfig) -> ControlResult<Self> {
        if config.error_threshold == 0 {
            return Err(ControlError::InvalidArg {
                what: "error_threshold must be at least 1",
            });
        }
        if !config.reserve_volume_gal.is_finite() || config.reserve_volume_gal <= 0.0 {
            return Err(ControlError::InvalidArg {
                what: "reserve_volume_gal must be positive and finite",
            });
        }
        Ok(Self {
            config,
            table: TransitionTable,
            state: PumpState::NotPumping,
            counter: ErrorCounter::new(config.error_threshold),
            session: PumpSession::default(),
        })
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn error_count(&self) -> u32 {
        self.counter.count
    }

    pub fn counter(&self) -> ErrorCounter {
        self.counter
    }

    pub fn session(&self) -> &PumpSession {
        &self.session
    }

    pub fn config(&self) -> &PumpAuthorityConfig {
        &self.config
    }

    pub fn is_latched(&self) -> bool {
        self.state == PumpState::ErrorState
    }

    /// Advance the machine with one snapshot.
    pub fn tick(&mut self, signals: SignalSnapshot, now: Timestamp) -> TickOutcome {
        let mut events = Vec::new();
        let Some(current) = self.fatal_check(now, &mut events) else {
            return self.outcome(events);
        };

        let transition = self
            .table
            .lookup(TransitionKey::new(signals.inputs(), current));
        self.counter.apply(transition.counter);
        if let Some(notice) = transition.notice {
            events.push(notice_event(notice));
        }
        let from = self.state;
        self.state = transition.next.into();
        if let Some(changed) = DomainEvent::state_changed(from, transition.next) {
            tracing::info!(from = %from, to = %self.state, "pump state changed");
            events.push(changed);
        }
        if let Some(action) = transition.action {
            self.run_action(action, now, &mut events);
        }
        self.outcome(events)
    }

    /// Advance the machine for a tick whose signals could not be trusted.
    ///
    /// Stale data counts as an error: the counter increments, an active pump
    /// cycle is stopped, and the latch engages on the next tick once the
    /// threshold is reached.
    pub fn tick_stale(&mut self, now: Timestamp, reason: &str) -> TickOutcome {
        let mut events = Vec::new();
        if self.fatal_check(now, &mut events).is_none() {
            return self.outcome(events);
        }

        self.counter.apply(CounterEffect::Increment);
        events.push(DomainEvent::Error {
            message: format!("ERROR: signal data stale: {reason}"),
        });
        let from = self.state;
        if from.is_pumping() {
            self.state = PumpState::NotPumping;
            events.push(DomainEvent::StateChanged {
                from,
                to: PumpState::NotPumping,
            });
            self.pump_stop(now, &mut events);
        }
        self.outcome(events)
    }

    /// Explicit external clear of the fatal latch.
    ///
    /// Returns no events when the machine is not latched.
    pub fn clear_fatal(&mut self, _now: Timestamp) -> Vec<DomainEvent> {
        if !self.is_latched() && !self.counter.tripped() {
            return Vec::new();
        }
        let from = self.state;
        self.counter.reset();
        self.state = PumpState::NotPumping;
        tracing::warn!("fatal latch cleared");
        let mut events = Vec::new();
        if from != PumpState::NotPumping {
            events.push(DomainEvent::StateChanged {
                from,
                to: PumpState::NotPumping,
            });
        }
        events.push(DomainEvent::FatalCleared);
        events
    }

    /// Latch if needed; returns the table state when normal logic may run.
    fn fatal_check(
        &mut self,
        now: Timestamp,
        events: &mut Vec<DomainEvent>,
    ) -> Option<OperatingState> {
        if self.counter.tripped() || self.is_latched() {
            if !self.is_latched() {
                let from = self.state;
                self.state = PumpState::ErrorState;
                self.session.pump_start_time = None;
                tracing::error!(
                    count = self.counter.count,
                    threshold = self.counter.threshold,
                    "error threshold reached, pump latched off"
                );
                events.push(DomainEvent::StateChanged {
                    from,
                    to: PumpState::ErrorState,
                });
                events.push(DomainEvent::PumpEvent(PumpEvent::bare(
                    PumpEventKind::FatalError,
                    now,
                )));
                events.push(DomainEvent::FatalStop {
                    message: FATAL_STOP_MESSAGE.to_string(),
                });
            }
            return None;
        }
        self.state.operating()
    }

    fn outcome(&self, events: Vec<DomainEvent>) -> TickOutcome {
        TickOutcome {
            state: self.state,
            events,
            command: ActuatorCommand::for_state(self.state),
        }
    }

    fn run_action(&mut self, action: SessionAction, now: Timestamp, events: &mut Vec<DomainEvent>) {
        match action {
            SessionAction::TankFull => self.on_tank_full(now, events),
            SessionAction::ManualStart => self.manual_start(now, events),
            SessionAction::Stop => self.pump_stop(now, events),
            SessionAction::MarkEmpty => {
                if self.session.pump_end_time.is_none() {
                    self.session.pump_end_time = Some(now);
                }
            }
        }
    }

    fn on_tank_full(&mut self, now: Timestamp, events: &mut Vec<DomainEvent>) {
        if self.session.pump_start_time.is_none() {
            self.session.pump_start_time = Some(now);
        }
        let mut event = PumpEvent::bare(PumpEventKind::AutoPumpStart, now);
        match self.session.pump_end_time.take() {
            Some(end) => {
                let fill_time = seconds_between(end, now).max(0.0);
                let gph = (fill_time > 0.0)
                    .then(|| self.config.reserve_volume_gal / fill_time * 3600.0);
                self.session.last_fill_time_s = Some(fill_time);
                self.session.last_gallons_per_hour = gph;
                event.fill_time_s = Some(fill_time);
                event.gallons_per_hour = gph;
            }
            None => events.push(DomainEvent::Warning {
                message: "WARNING: tank full & started pumping but no pump_end_time".to_string(),
            }),
        }
        events.push(DomainEvent::PumpEvent(event));
    }

    fn manual_start(&mut self, now: Timestamp, events: &mut Vec<DomainEvent>) {
        if self.session.pump_start_time.is_none() {
            self.session.pump_start_time = Some(now);
        }
        self.session.pump_end_time = None;
        self.session.last_fill_time_s = None;
        self.session.last_gallons_per_hour = None;
        events.push(DomainEvent::PumpEvent(PumpEvent::bare(
            PumpEventKind::ManualPumpStart,
            now,
        )));
    }

    fn pump_stop(&mut self, now: Timestamp, events: &mut Vec<DomainEvent>) {
        let run_time = self
            .session
            .pump_start_time
            .map(|start| seconds_between(start, now).max(0.0));
        if run_time.is_none() {
            events.push(DomainEvent::Warning {
                message: "WARNING: Missing valid start time for pump event".to_string(),
            });
        }
        let interval = self
            .session
            .last_stop_time
            .map(|last| seconds_between(last, now).max(0.0));
        events.push(DomainEvent::PumpEvent(PumpEvent {
            kind: PumpEventKind::PumpStop,
            at: now,
            run_time_s: run_time,
            interval_s: interval,
            fill_time_s: None,
            gallons_per_hour: self.session.last_gallons_per_hour,
        }));
        self.session.pump_end_time = Some(now);
        self.session.last_stop_time = Some(now);
        self.session.pump_start_time = None;
    }
}

fn notice_event(notice: Notice) -> DomainEvent {
    let message = notice.text.to_string();
    match notice.severity {
        Severity::Warning => DomainEvent::Warning { message },
        Severity::Error => DomainEvent::Error { message },
        Severity::Fatal => DomainEvent::FatalStop { message },
    }
}
