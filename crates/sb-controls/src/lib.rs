//! Pump authority and signal primitives for sugarbush.
//!
//! This crate owns the single decision point for energizing the transfer pump.
//! Everything upstream (live cache, replay traces) reduces to a
//! [`SignalSnapshot`]; everything downstream (durable queue, relay) consumes the
//! [`TickOutcome`] produced by [`PumpAuthority`].
//!
//! # Architecture
//!
//! - Signals are three booleans (P1 tank-full, P2 manual-start, P3 tank-empty)
//!   plus named auxiliary values
//! - The transition table is declarative data, indexed by inputs and state
//! - The state machine holds pump state, the error counter and session timing
//! - Actuators are driven from the machine's command, never from raw signals
//!
//! # Design Principles
//!
//! - **Pure ticks**: same prior state and same snapshot give the same outcome
//! - **Fail-safe**: fatal latch and stale data always command the relay off
//! - **No hidden time**: every tick is told `now`; nothing here reads a clock

pub mod actuator;
pub mod error;
pub mod events;
pub mod hold;
pub mod machine;
pub mod signal;
pub mod source;
pub mod state;
pub mod transition;

pub use actuator::{ActuatorCommand, FileRelay, LoggingRelay, MemoryRelay, Relay, RelayGuard};
pub use error::{ControlError, ControlResult};
pub use events::{DomainEvent, PumpEvent, PumpEventKind, Severity};
pub use hold::HoldDetector;
pub use machine::{
    DEFAULT_ERROR_THRESHOLD, DEFAULT_RESERVE_VOLUME_GAL, FATAL_STOP_MESSAGE, PumpAuthority,
    PumpAuthorityConfig, TickOutcome,
};
pub use signal::{AuxValue, SignalSnapshot, aux};
pub use source::{SignalSource, SourceReading};
pub use state::{ErrorCounter, PumpSession, PumpState};
pub use transition::{
    CounterEffect, Inputs, Notice, OperatingState, SessionAction, Transition, TransitionKey,
    TransitionTable,
};
