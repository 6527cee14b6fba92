//! Pump state, error counter and session timing.

use sb_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::transition::{CounterEffect, OperatingState};

/// The four pump states. Exactly one is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpState {
    Pumping,
    ManualPumping,
    NotPumping,
    ErrorState,
}

impl PumpState {
    /// True for states that energize the relay.
    pub fn is_pumping(self) -> bool {
        matches!(self, Self::Pumping | Self::ManualPumping)
    }

    /// Table state, or `None` while latched.
    pub fn operating(self) -> Option<OperatingState> {
        match self {
            Self::Pumping => Some(OperatingState::Pumping),
            Self::ManualPumping => Some(OperatingState::ManualPumping),
            Self::NotPumping => Some(OperatingState::NotPumping),
            Self::ErrorState => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pumping => "pumping",
            Self::ManualPumping => "manual_pumping",
            Self::NotPumping => "not_pumping",
            Self::ErrorState => "error_state",
        }
    }
}

impl From<OperatingState> for PumpState {
    fn from(state: OperatingState) -> Self {
        match state {
            OperatingState::Pumping => Self::Pumping,
            OperatingState::ManualPumping => Self::ManualPumping,
            OperatingState::NotPumping => Self::NotPumping,
        }
    }
}

impl std::fmt::Display for PumpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consecutive-error counter with its fatal threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounter {
    pub count: u32,
    pub threshold: u32,
}

impl ErrorCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    pub fn apply(&mut self, effect: CounterEffect) {
        match effect {
            CounterEffect::Increment => self.count = self.count.saturating_add(1),
            CounterEffect::Reset => self.count = 0,
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn tripped(&self) -> bool {
        self.count >= self.threshold
    }
}

/// Timing of the current or most recent pump cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PumpSession {
    pub pump_start_time: Option<Timestamp>,
    pub pump_end_time: Option<Timestamp>,
    pub last_stop_time: Option<Timestamp>,
    pub last_fill_time_s: Option<f64>,
    pub last_gallons_per_hour: Option<f64>,
}
