//! Pump relay drivers.
//!
//! The relay is the only physical output of the controller. It is driven from
//! the state machine's [`ActuatorCommand`], never from raw signals:
//! - [`LoggingRelay`] for replay and bench runs without hardware
//! - [`FileRelay`] for a GPIO exposed as a value file (sysfs style)
//! - [`MemoryRelay`] to observe commands in tests
//!
//! [`RelayGuard`] forces the relay off when dropped, so unwinding or an early
//! return out of the controller loop still leaves the pump de-energized.

use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::state::PumpState;

/// Desired relay level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorCommand {
    On,
    Off,
}

impl ActuatorCommand {
    /// On only while pumping; every other state commands off.
    pub fn for_state(state: PumpState) -> Self {
        if state.is_pumping() { Self::On } else { Self::Off }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

/// A pump relay.
pub trait Relay {
    /// Apply a command. Implementations may skip redundant writes.
    fn apply(&mut self, command: ActuatorCommand) -> ControlResult<()>;

    /// Drive off unconditionally, even if the last applied command was off.
    fn force_off(&mut self) -> ControlResult<()>;
}

impl<R: Relay + ?Sized> Relay for Box<R> {
    fn apply(&mut self, command: ActuatorCommand) -> ControlResult<()> {
        (**self).apply(command)
    }

    fn force_off(&mut self) -> ControlResult<()> {
        (**self).force_off()
    }
}

impl<R: Relay + ?Sized> Relay for &mut R {
    fn apply(&mut self, command: ActuatorCommand) -> ControlResult<()> {
        (**self).apply(command)
    }

    fn force_off(&mut self) -> ControlResult<()> {
        (**self).force_off()
    }
}

/// Relay that only logs level changes.
#[derive(Debug, Default)]
pub struct LoggingRelay {
    last: Option<ActuatorCommand>,
}

impl LoggingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<ActuatorCommand> {
        self.last
    }
}

impl Relay for LoggingRelay {
    fn apply(&mut self, command: ActuatorCommand) -> ControlResult<()> {
        if self.last != Some(command) {
            tracing::info!(?command, "pump relay");
            self.last = Some(command);
        }
        Ok(())
    }

    fn force_off(&mut self) -> ControlResult<()> {
        tracing::info!("pump relay forced off");
        self.last = Some(ActuatorCommand::Off);
        Ok(())
    }
}

/// Relay backed by a value file that accepts `1` / `0`.
#[derive(Debug)]
pub struct FileRelay {
    path: PathBuf,
    active_high: bool,
    last: Option<ActuatorCommand>,
}

impl FileRelay {
    /// Create a relay writing to `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Value file of the output line
    /// * `active_high` - Whether writing `1` energizes the relay
    pub fn new(path: impl Into<PathBuf>, active_high: bool) -> Self {
        Self {
            path: path.into(),
            active_high,
            last: None,
        }
    }

    fn level(&self, command: ActuatorCommand) -> &'static str {
        if command.is_on() == self.active_high {
            "1"
        } else {
            "0"
        }
    }

    fn write(&mut self, command: ActuatorCommand) -> ControlResult<()> {
        fs::write(&self.path, self.level(command)).map_err(|e| ControlError::Actuator {
            message: format!("{}: {e}", self.path.display()),
        })?;
        self.last = Some(command);
        Ok(())
    }
}

impl Relay for FileRelay {
    fn apply(&mut self, command: ActuatorCommand) -> ControlResult<()> {
        if self.last == Some(command) {
            return Ok(());
        }
        tracing::debug!(?command, path = %self.path.display(), "writing relay level");
        self.write(command)
    }

    fn force_off(&mut self) -> ControlResult<()> {
        self.write(ActuatorCommand::Off)
    }
}

/// Relay that records every command it receives.
#[derive(Debug, Default, Clone)]
pub struct MemoryRelay {
    pub history: Vec<ActuatorCommand>,
    pub forced_off: usize,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ActuatorCommand {
        self.history.last().copied().unwrap_or(ActuatorCommand::Off)
    }
}

impl Relay for MemoryRelay {
    fn apply(&mut self, command: ActuatorCommand) -> ControlResult<()> {
        self.history.push(command);
        Ok(())
    }

    fn force_off(&mut self) -> ControlResult<()> {
        self.forced_off += 1;
        self.history.push(ActuatorCommand::Off);
        Ok(())
    }
}

/// Owns a relay and forces it off on drop.
#[derive(Debug)]
pub struct RelayGuard<R: Relay> {
    relay: R,
}

impl<R: Relay> RelayGuard<R> {
    pub fn new(relay: R) -> Self {
        Self { relay }
    }
}

impl<R: Relay> Deref for RelayGuard<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.relay
    }
}

impl<R: Relay> DerefMut for RelayGuard<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.relay
    }
}

impl<R: Relay> Drop for RelayGuard<R> {
    fn drop(&mut self) {
        if let Err(err) = self.relay.force_off() {
            tracing::error!(%err, "failed to force pump relay off");
        }
    }
}
