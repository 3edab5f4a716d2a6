//! Error types for data parsing in wishring-types.

use thiserror::Error;

/// Errors that can occur when decoding data received from the ring.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in wishring-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// Payload was shorter than the fixed wire layout requires.
    #[error("Insufficient bytes: expected {expected}, got {actual}")]
    InsufficientBytes {
        /// Expected payload size.
        expected: usize,
        /// Actual payload size received.
        actual: usize,
    },

    /// Payload carried a value outside the protocol's domain.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using wishring-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
