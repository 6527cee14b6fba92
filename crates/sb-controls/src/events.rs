//! Domain events emitted by the pump authority.

use sb_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::transition::OperatingState;
use crate::state::PumpState;

/// Severity of an operator-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

/// Discrete pump event kinds as they appear on the wire and in replay traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PumpEventKind {
    #[serde(rename = "Auto Pump Start")]
    AutoPumpStart,
    #[serde(rename = "Manual Pump Start")]
    ManualPumpStart,
    #[serde(rename = "Pump Stop")]
    PumpStop,
    #[serde(rename = "Fatal Error")]
    FatalError,
}

impl PumpEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoPumpStart => "Auto Pump Start",
            Self::ManualPumpStart => "Manual Pump Start",
            Self::PumpStop => "Pump Stop",
            Self::FatalError => "Fatal Error",
        }
    }

    /// Parse a trace label; surrounding whitespace and case are ignored.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        [
            Self::AutoPumpStart,
            Self::ManualPumpStart,
            Self::PumpStop,
            Self::FatalError,
        ]
        .into_iter()
        .find(|k| k.as_str().eq_ignore_ascii_case(label))
    }
}

impl std::fmt::Display for PumpEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded pump cycle event.
///
/// Durations are seconds; `gallons_per_hour` is derived from the reserve
/// volume and the fill time that preceded an auto start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpEvent {
    pub kind: PumpEventKind,
    pub at: Timestamp,
    pub run_time_s: Option<f64>,
    pub interval_s: Option<f64>,
    pub fill_time_s: Option<f64>,
    pub gallons_per_hour: Option<f64>,
}

impl PumpEvent {
    pub fn bare(kind: PumpEventKind, at: Timestamp) -> Self {
        Self {
            kind,
            at,
            run_time_s: None,
            interval_s: None,
            fill_time_s: None,
            gallons_per_hour: None,
        }
    }
}

/// Everything a tick can report besides the new state and actuator command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    StateChanged { from: PumpState, to: PumpState },
    PumpEvent(PumpEvent),
    Warning { message: String },
    Error { message: String },
    FatalStop { message: String },
    FatalCleared,
}

impl DomainEvent {
    /// Message and severity for events that belong in the error log.
    pub fn notice(&self) -> Option<(Severity, &str)> {
        match self {
            Self::Warning { message } => Some((Severity::Warning, message)),
            Self::Error { message } => Some((Severity::Error, message)),
            Self::FatalStop { message } => Some((Severity::Fatal, message)),
            _ => None,
        }
    }

    pub(crate) fn state_changed(from: PumpState, to: OperatingState) -> Option<Self> {
        let to = PumpState::from(to);
        (from != to).then_some(Self::StateChanged { from, to })
    }
}
