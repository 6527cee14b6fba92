//! Declarative transition table for the pump authority.
//!
//! Every combination of the three inputs and the three operating states maps
//! to exactly one [`Transition`]. The table is plain data so that it can be
//! reviewed row by row and tested exhaustively.

use serde::{Deserialize, Serialize};

use crate::events::Severity;

/// Pump state that participates in table lookup.
///
/// The fatal latch is handled by the machine before lookup and has no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatingState {
    Pumping,
    ManualPumping,
    NotPumping,
}

impl OperatingState {
    pub const ALL: [OperatingState; 3] = [
        OperatingState::Pumping,
        OperatingState::ManualPumping,
        OperatingState::NotPumping,
    ];

    fn index(self) -> usize {
        match self {
            Self::Pumping => 0,
            Self::ManualPumping => 1,
            Self::NotPumping => 2,
        }
    }

    /// Short phrase used in notice texts.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Pumping => "auto pumping",
            Self::ManualPumping => "manual pumping",
            Self::NotPumping => "not pumping",
        }
    }
}

/// The three float-switch / button inputs of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inputs {
    pub tank_full: bool,
    pub manual_start: bool,
    pub tank_empty: bool,
}

impl Inputs {
    pub const fn new(tank_full: bool, manual_start: bool, tank_empty: bool) -> Self {
        Self {
            tank_full,
            manual_start,
            tank_empty,
        }
    }

    /// All eight input combinations, in P1P2P3 binary order.
    pub fn all() -> [Inputs; 8] {
        let mut out = [Inputs::new(false, false, false); 8];
        for (bits, slot) in out.iter_mut().enumerate() {
            *slot = Inputs::from_bits(bits as u8);
        }
        out
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self::new(bits & 0b100 != 0, bits & 0b010 != 0, bits & 0b001 != 0)
    }

    pub const fn bits(self) -> u8 {
        ((self.tank_full as u8) << 2) | ((self.manual_start as u8) << 1) | (self.tank_empty as u8)
    }
}

/// Lookup key: inputs plus current operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionKey {
    pub inputs: Inputs,
    pub state: OperatingState,
}

impl TransitionKey {
    pub const fn new(inputs: Inputs, state: OperatingState) -> Self {
        Self { inputs, state }
    }

    /// Dense row index in `0..24`.
    pub fn index(self) -> usize {
        self.inputs.bits() as usize * 3 + self.state.index()
    }
}

/// Effect a transition has on the consecutive-error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterEffect {
    Increment,
    Reset,
}

/// Operator-facing notice attached to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub text: &'static str,
}

/// Session bookkeeping requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAction {
    /// Auto pump start on tank full; closes out fill timing.
    TankFull,
    /// Manual pump start.
    ManualStart,
    /// Pump stop on tank empty; records run time and interval.
    Stop,
    /// Tank empty while idle; starts fill timing if not already started.
    MarkEmpty,
}

/// One row of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub key: TransitionKey,
    pub next: OperatingState,
    pub counter: CounterEffect,
    pub notice: Option<Notice>,
    pub action: Option<SessionAction>,
}

use CounterEffect::{Increment, Reset};
use OperatingState::{ManualPumping as M, NotPumping as N, Pumping as P};
use SessionAction::{ManualStart, MarkEmpty, Stop, TankFull};

const fn warn(text: &'static str) -> Option<Notice> {
    Some(Notice {
        severity: Severity::Warning,
        text,
    })
}

const fn error(text: &'static str) -> Option<Notice> {
    Some(Notice {
        severity: Severity::Error,
        text,
    })
}

const fn row(
    bits: u8,
    state: OperatingState,
    next: OperatingState,
    counter: CounterEffect,
    notice: Option<Notice>,
    action: Option<SessionAction>,
) -> Transition {
    Transition {
        key: TransitionKey::new(Inputs::from_bits(bits), state),
        next,
        counter,
        notice,
        action,
    }
}

/// Rows ordered by [`TransitionKey::index`].
const ROWS: [Transition; 24] = [
    // 000: nothing asserted
    row(0b000, P, P, Reset, None, None),
    row(0b000, M, M, Reset, None, None),
    row(0b000, N, N, Reset, None, None),
    // 001: tank empty
    row(0b001, P, N, Reset, None, Some(Stop)),
    row(0b001, M, N, Reset, None, Some(Stop)),
    row(0b001, N, N, Reset, None, Some(MarkEmpty)),
    // 010: manual start
    row(
        0b010,
        P,
        P,
        Reset,
        warn("WARNING: received manual pump signal while auto pumping"),
        None,
    ),
    row(0b010, M, M, Reset, None, None),
    row(0b010, N, M, Reset, None, Some(ManualStart)),
    // 011: manual start + tank empty
    row(
        0b011,
        P,
        N,
        Reset,
        warn("WARNING: received simultaneous tank empty and manual pump start signals while auto pumping"),
        Some(Stop),
    ),
    row(
        0b011,
        M,
        N,
        Reset,
        warn("WARNING: received simultaneous tank empty and manual pump start signals while manual pumping"),
        Some(Stop),
    ),
    row(
        0b011,
        N,
        N,
        Reset,
        warn("WARNING: received simultaneous tank empty and manual pump start signals while not pumping"),
        None,
    ),
    // 100: tank full
    row(
        0b100,
        P,
        P,
        Increment,
        warn("WARNING: received tank full signal while auto pumping"),
        None,
    ),
    row(
        0b100,
        M,
        P,
        Increment,
        warn("WARNING: received tank full signal while manual pumping"),
        Some(TankFull),
    ),
    row(0b100, N, P, Reset, None, Some(TankFull)),
    // 101: tank full + tank empty
    row(
        0b101,
        P,
        P,
        Increment,
        error("ERROR: received simultaneous tank empty and tank full signals while auto pumping"),
        None,
    ),
    row(
        0b101,
        M,
        M,
        Increment,
        error("ERROR: received simultaneous tank empty and tank full signals while manual pumping"),
        None,
    ),
    row(
        0b101,
        N,
        P,
        Increment,
        error("ERROR: received simultaneous tank empty and tank full signals while not pumping"),
        None,
    ),
    // 110: tank full + manual start
    row(
        0b110,
        P,
        P,
        Increment,
        warn("WARNING: received simultaneous tank full and manual start signals while auto pumping"),
        None,
    ),
    row(
        0b110,
        M,
        P,
        Increment,
        warn("WARNING: received simultaneous tank full and manual start signals while manually pumping"),
        Some(TankFull),
    ),
    row(
        0b110,
        N,
        P,
        Increment,
        warn("WARNING: received simultaneous tank full and manual start signals while not pumping"),
        Some(TankFull),
    ),
    // 111: everything asserted
    row(
        0b111,
        P,
        P,
        Increment,
        error("ERROR: received simultaneous tank empty, manual start, and tank full signals while auto pumping"),
        None,
    ),
    row(
        0b111,
        M,
        M,
        Increment,
        error("ERROR: received simultaneous tank empty, manual start, and tank full signals while manual pumping"),
        None,
    ),
    row(
        0b111,
        N,
        P,
        Increment,
        error("ERROR: received simultaneous tank empty, manual start, and tank full signals while not pumping"),
        None,
    ),
];

/// Total lookup over [`TransitionKey`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionTable;

impl TransitionTable {
    pub fn lookup(&self, key: TransitionKey) -> &'static Transition {
        &ROWS[key.index()]
    }

    pub fn rows(&self) -> &'static [Transition] {
        &ROWS
    }
}
