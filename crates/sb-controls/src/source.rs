//! Signal source abstraction shared by the live cache reader and replay.

use crate::error::ControlResult;
use crate::signal::SignalSnapshot;

/// Result of one read from a signal source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceReading {
    Fresh(SignalSnapshot),
    /// Data exists but cannot be trusted; the controller escalates as an error.
    Stale { reason: String },
    /// A finite source has nothing more to give.
    EndOfData,
}

/// Produces one snapshot per controller tick.
pub trait SignalSource {
    fn read(&mut self) -> ControlResult<SourceReading>;
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn read(&mut self) -> ControlResult<SourceReading> {
        (**self).read()
    }
}

/// Plays back a fixed list of readings, then reports end of data.
impl SignalSource for std::collections::VecDeque<SourceReading> {
    fn read(&mut self) -> ControlResult<SourceReading> {
        Ok(self.pop_front().unwrap_or(SourceReading::EndOfData))
    }
}
