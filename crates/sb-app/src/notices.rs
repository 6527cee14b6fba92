//! Repeated-notice suppression for the error log stream.

use sb_core::{Timestamp, seconds_between};

/// Drops a notice identical to the previous one if it arrives within `window_s`.
#[derive(Debug, Clone)]
pub struct NoticeSuppressor {
    window_s: f64,
    last: Option<(String, Timestamp)>,
}

impl NoticeSuppressor {
    pub fn new(window_s: f64) -> Self {
        Self {
            window_s,
            last: None,
        }
    }

    /// True when `message` should be queued at `now`.
    pub fn admit(&mut self, message: &str, now: Timestamp) -> bool {
        if let Some((last, at)) = &self.last {
            if last == message && seconds_between(*at, now) < self.window_s {
                return false;
            }
        }
        self.last = Some((message.to_string(), now));
        true
    }

    /// True when `message` differs from the last admitted one.
    pub fn is_new(&self, message: &str) -> bool {
        self.last.as_ref().is_none_or(|(last, _)| last != message)
    }
}
