//! Synthetic clock.
//!
//! Virtual now is computed, never stored:
//! `origin + (wall_now - started_at_wallclock + manual_offset) * multiplier`.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use sb_core::{Clock, SystemClock, Timestamp};

/// Fastest speed-up a virtual clock accepts.
pub const MAX_MULTIPLIER: f64 = 1e6;

#[derive(Debug, Clone, Copy)]
struct Anchor {
    origin: Timestamp,
    started_at_wallclock: Timestamp,
    manual_offset: Duration,
}

/// Wall-clock-backed virtual time running `multiplier` times faster than the
/// wall clock it reads.
#[derive(Debug)]
pub struct VirtualClock<W: Clock = SystemClock> {
    wall: W,
    multiplier: f64,
    anchor: Mutex<Anchor>,
}

impl VirtualClock<SystemClock> {
    pub fn system(origin: Timestamp, multiplier: f64) -> crate::ReplayResult<Self> {
        Self::new(origin, multiplier, SystemClock)
    }
}

impl<W: Clock> VirtualClock<W> {
    /// # Errors
    ///
    /// Returns error unless `multiplier` is positive and at most
    /// [`MAX_MULTIPLIER`].
    pub fn new(origin: Timestamp, multiplier: f64, wall: W) -> crate::ReplayResult<Self> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(crate::ReplayError::InvalidArg {
                what: "multiplier must be a positive finite number",
            });
        }
        if multiplier > MAX_MULTIPLIER {
            return Err(crate::ReplayError::InvalidArg {
                what: "multiplier must not exceed 1000000",
            });
        }
        let started_at_wallclock = wall.now();
        Ok(Self {
            wall,
            multiplier,
            anchor: Mutex::new(Anchor {
                origin,
                started_at_wallclock,
                manual_offset: Duration::zero(),
            }),
        })
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn origin(&self) -> Timestamp {
        self.anchor().origin
    }

    /// Skip ahead as if `wallclock_delta` of wall time had passed.
    pub fn advance(&self, wallclock_delta: Duration) -> Timestamp {
        {
            let mut anchor = self.anchor.lock().unwrap_or_else(|e| e.into_inner());
            anchor.manual_offset += wallclock_delta;
        }
        self.now()
    }

    /// Restart virtual time at `origin` from the current wall instant.
    pub fn rebase(&self, origin: Timestamp) {
        let wall_now = self.wall.now();
        let mut anchor = self.anchor.lock().unwrap_or_else(|e| e.into_inner());
        *anchor = Anchor {
            origin,
            started_at_wallclock: wall_now,
            manual_offset: Duration::zero(),
        };
    }

    /// Wall time needed for virtual time to cover `virtual_delta`.
    pub fn wall_duration(&self, virtual_delta: Duration) -> Duration {
        scale(virtual_delta, 1.0 / self.multiplier)
    }

    fn anchor(&self) -> Anchor {
        *self.anchor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Clock> Clock for VirtualClock<W> {
    fn now(&self) -> Timestamp {
        let anchor = self.anchor();
        let elapsed = self.wall.now() - anchor.started_at_wallclock + anchor.manual_offset;
        let delta = scale(elapsed, self.multiplier);
        // saturate at the ends of representable time
        anchor.origin.checked_add_signed(delta).unwrap_or(if delta < Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
    }
}

fn scale(d: Duration, factor: f64) -> Duration {
    let micros = d.num_microseconds().unwrap_or(i64::MAX) as f64 * factor;
    // float to int casts saturate
    Duration::microseconds(micros.round() as i64)
}
