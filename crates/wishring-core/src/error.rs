//! Error types for BLE operations.

use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during device discovery, connection, and I/O.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Underlying Bluetooth stack error.
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable Bluetooth adapter, or the radio is powered off.
    #[error("bluetooth radio unavailable")]
    RadioUnavailable,

    /// No device matching the given identifier was found.
    #[error("device not found: {identifier}")]
    DeviceNotFound {
        /// Address or name fragment that failed to match.
        identifier: String,
    },

    /// An operation that requires a live connection was called without one.
    #[error("not connected to a device")]
    NotConnected,

    /// A connect or reconnect sequence is already in flight.
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    /// The transport refused or dropped the connection attempt.
    #[error("connection rejected: {reason}")]
    TransportRejected {
        /// Stack-provided failure detail.
        reason: String,
    },

    /// Service discovery did not produce a usable GATT table.
    #[error("service discovery failed: {reason}")]
    ServiceDiscoveryFailed {
        /// Stack-provided failure detail.
        reason: String,
    },

    /// A required characteristic is missing from the discovered services.
    #[error("characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// UUID of the missing characteristic.
        uuid: String,
    },

    /// A characteristic exposes notifications but carries no client config
    /// descriptor to enable them through.
    #[error("descriptor not found on characteristic {characteristic}")]
    DescriptorNotFound {
        /// UUID of the characteristic that lacks the descriptor.
        characteristic: String,
    },

    /// A GATT write was rejected by the remote device.
    #[error("write to {uuid} failed: {reason}")]
    WriteFailed {
        /// Target characteristic UUID.
        uuid: String,
        /// Stack-provided failure detail.
        reason: String,
    },

    /// A payload received from the device could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(#[from] wishring_types::ParseError),

    /// An operation exceeded its deadline.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// Deadline that was exceeded.
        duration: Duration,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Persisted device record could not be read or written.
    #[error("device store error: {0}")]
    Store(#[from] serde_json::Error),

    /// Filesystem error while persisting device records.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Creates a device-not-found error.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            identifier: identifier.into(),
        }
    }

    /// Creates a transport-rejected error from any failure detail.
    pub fn rejected(reason: impl ToString) -> Self {
        Self::TransportRejected {
            reason: reason.to_string(),
        }
    }

    /// Creates a service-discovery failure from any failure detail.
    pub fn discovery_failed(reason: impl ToString) -> Self {
        Self::ServiceDiscoveryFailed {
            reason: reason.to_string(),
        }
    }

    /// Creates a write failure for the given characteristic.
    pub fn write_failed(uuid: uuid::Uuid, reason: impl ToString) -> Self {
        Self::WriteFailed {
            uuid: uuid.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if retrying the failed operation could plausibly
    /// succeed. Drives the auto-reconnect coordinator's decision to keep
    /// going after a failed direct attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::TransportRejected { .. }
                | Self::ServiceDiscoveryFailed { .. }
                | Self::WriteFailed { .. }
                | Self::Timeout { .. }
                | Self::NotConnected
                | Self::DeviceNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classified_retryable() {
        let err = Error::timeout("connect", Duration::from_secs(30));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connect"));
    }

    #[test]
    fn cancelled_is_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::ConnectInProgress.is_retryable());
        assert!(!Error::RadioUnavailable.is_retryable());
    }

    #[test]
    fn parse_error_converts() {
        let parse = wishring_types::ParseError::InsufficientBytes {
            expected: 4,
            actual: 1,
        };
        let err: Error = parse.into();
        assert!(matches!(err, Error::InvalidData(_)));
        assert!(!err.is_retryable());
    }
}
