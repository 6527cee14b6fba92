//! Signal snapshot types.

use std::collections::BTreeMap;

use sb_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::transition::Inputs;

/// Well-known auxiliary signal names.
pub mod aux {
    /// Operator button that clears the fatal latch once held long enough.
    pub const CLEAR_FATAL: &str = "clear_fatal";
    /// Averaged line vacuum in inches of mercury.
    pub const VACUUM_INHG: &str = "vacuum_inhg";
}

/// Auxiliary signal value.
///
/// Serialized untagged so cache files read naturally (`true`, `12.5`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuxValue {
    Flag(bool),
    Scalar(f64),
}

impl AuxValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            Self::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Flag(_) => None,
        }
    }
}

impl From<bool> for AuxValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<f64> for AuxValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

/// One tick's worth of inputs.
///
/// Produced once per tick by a signal source and handed by value to the
/// state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub timestamp: Timestamp,
    /// P1
    pub tank_full: bool,
    /// P2
    pub manual_start: bool,
    /// P3
    pub tank_empty: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, AuxValue>,
}

impl SignalSnapshot {
    pub fn new(timestamp: Timestamp, tank_full: bool, manual_start: bool, tank_empty: bool) -> Self {
        Self {
            timestamp,
            tank_full,
            manual_start,
            tank_empty,
            aux: BTreeMap::new(),
        }
    }

    /// All three inputs released.
    pub fn idle(timestamp: Timestamp) -> Self {
        Self::new(timestamp, false, false, false)
    }

    pub fn with_aux(mut self, name: impl Into<String>, value: impl Into<AuxValue>) -> Self {
        self.aux.insert(name.into(), value.into());
        self
    }

    pub fn inputs(&self) -> Inputs {
        Inputs::new(self.tank_full, self.manual_start, self.tank_empty)
    }

    /// Missing or non-boolean aux flags read as released.
    pub fn aux_flag(&self, name: &str) -> bool {
        self.aux
            .get(name)
            .and_then(AuxValue::as_flag)
            .unwrap_or(false)
    }

    pub fn aux_scalar(&self, name: &str) -> Option<f64> {
        self.aux.get(name).and_then(AuxValue::as_scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn idle_snapshot_has_no_inputs() {
        let snap = SignalSnapshot::idle(t0());
        assert_eq!(snap.inputs(), Inputs::new(false, false, false));
        assert!(!snap.aux_flag(aux::CLEAR_FATAL));
    }

    #[test]
    fn aux_values_are_typed() {
        let snap = SignalSnapshot::idle(t0())
            .with_aux(aux::CLEAR_FATAL, true)
            .with_aux(aux::VACUUM_INHG, -22.5);
        assert!(snap.aux_flag(aux::CLEAR_FATAL));
        assert_eq!(snap.aux_scalar(aux::VACUUM_INHG), Some(-22.5));
        assert_eq!(snap.aux_scalar(aux::CLEAR_FATAL), None);
    }

    #[test]
    fn aux_serializes_untagged() {
        let snap = SignalSnapshot::new(t0(), true, false, false).with_aux(aux::VACUUM_INHG, 3.0);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"vacuum_inhg\":3.0"));
        let back: SignalSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
