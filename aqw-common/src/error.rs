//! Common error types for AQW

use thiserror::Error;

/// Common result type for AQW operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared across AQW crates
///
/// Component-specific failures (lock contention, duplicate votes, review
/// state errors) live next to the component that produces them; this enum
/// covers the shared concerns only.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A state that must never occur if the components are correct.
    /// Logged loudly at the detection site; signals a defect, not a
    /// caller mistake.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}
