//! Error types for pump control operations.

use thiserror::Error;

/// Result type for pump control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in pump control operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// Invalid argument provided to a control function.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// The relay could not be driven.
    #[error("Actuator error: {message}")]
    Actuator { message: String },

    /// The signal source failed in a way that cannot be reported as staleness.
    #[error("Signal source failure: {message}")]
    Source { message: String },
}
