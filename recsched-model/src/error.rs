//! Error types for the recsched data model.

use thiserror::Error;

/// Errors raised while decoding or validating model values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// ARIB MJD/BCD time field could not be decoded.
    #[error("Invalid ARIB time: {0}")]
    InvalidAribTime(String),

    /// Follow mode code is unknown.
    #[error("Unknown follow mode: {0}")]
    UnknownFollowMode(u8),

    /// Post-stop action code is unknown.
    #[error("Unknown post-stop action: {0}")]
    UnknownPostStopAction(u8),

    /// Weekday flag string is malformed.
    #[error("Invalid weekday flags: {0:?} (expected 7 characters of '0'/'1')")]
    InvalidWeekdays(String),

    /// Daily search window is out of range.
    #[error("Invalid query window: start={start}s, duration={duration}s")]
    InvalidWindow { start: u32, duration: u32 },
}
