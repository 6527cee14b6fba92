//! sb-core: stable foundation for sugarbush.
//!
//! Contains:
//! - clock (injectable time source, manual test clock, stoppable sleep)
//! - time (timestamp parsing/formatting shared by every stream)
//! - error (shared error types)

pub mod clock;
pub mod error;
pub mod time;

// Re-exports: nice ergonomics for downstream crates
pub use clock::{Clock, ManualClock, SystemClock, sleep_unless_stopped};
pub use error::{CoreError, CoreResult};
pub use time::{Timestamp, format_timestamp, parse_timestamp, seconds_between};
