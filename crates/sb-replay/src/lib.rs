//! sb-replay: synthetic clock and recorded-trace replay.
//!
//! Recorded CSV traces are driven through the same control and upload path as
//! live signals. A [`VirtualClock`] maps wall time onto trace time at a
//! configurable multiplier; a [`ReplaySource`] merges one cursor per stream
//! and hands out rows as virtual time reaches them.

pub mod clock;
pub mod csv;
pub mod signals;
pub mod source;
pub mod trace;

pub use clock::{MAX_MULTIPLIER, VirtualClock};
pub use signals::ReplaySignals;
pub use source::{ReplayConfig, ReplayCursor, ReplayEvent, ReplayPoll, ReplaySource};
pub use trace::{PumpSample, StreamKind, StreamTrace, TankSample, TraceRecord, TraceRow};

pub type ReplayResult<T> = Result<T, ReplayError>;

#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("No replay rows in any enabled stream")]
    Empty,
}
