//! Errors surfaced before a minimization starts iterating.
//!
//! Anything that goes wrong once iterations are running is reported through
//! [`Status`](crate::Status) instead, together with the best point found.

use derive_builder::UninitializedFieldError;

/// Configuration and shape errors. None of these is produced after the
/// objective has been evaluated for the first time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The bounds do not match the initial point or are inverted.
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
    /// A solver parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<UninitializedFieldError> for Error {
    fn from(e: UninitializedFieldError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
