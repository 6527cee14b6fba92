//! Press-and-hold detection for auxiliary control inputs.

use sb_core::{Timestamp, seconds_between};

/// Fires once when an input has been held continuously for `hold_s` seconds.
///
/// Releasing the input re-arms the detector.
#[derive(Debug, Clone)]
pub struct HoldDetector {
    hold_s: f64,
    started: Option<Timestamp>,
    fired: bool,
}

impl HoldDetector {
    pub fn new(hold_s: f64) -> Self {
        Self {
            hold_s: hold_s.max(0.0),
            started: None,
            fired: false,
        }
    }

    /// Feed the current input level; returns true on the tick the hold completes.
    pub fn update(&mut self, active: bool, now: Timestamp) -> bool {
        if !active {
            self.started = None;
            self.fired = false;
            return false;
        }
        let started = *self.started.get_or_insert(now);
        if self.fired {
            return false;
        }
        if seconds_between(started, now) >= self.hold_s {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn is_held(&self) -> bool {
        self.started.is_some()
    }
}
