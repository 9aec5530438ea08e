use crate::types::SessionState;
use std::error;
use std::fmt;
use std::io;
use std::time::Duration;

/// Represents errors that can occur during RPLIDAR operations.
#[derive(Debug)]
pub enum Error {
    /// The transport is unavailable or the handshake failed. Fatal to the session,
    /// a reconnect is required.
    ConnectionError {
        operation: &'static str,
        elapsed: Duration,
        description: String,
    },

    /// A single frame failed sync, size, checksum or check-bit validation.
    ProtocolError { description: String },

    /// The operation is not allowed in the current session state.
    DeviceError {
        operation: &'static str,
        state: SessionState,
    },

    /// No answer or data arrived within the configured window.
    OperationTimeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// The execution of operation failed. Contains a description of the failure.
    OperationFail { description: String },

    /// An I/O error occurred while communicating with the underlying transport.
    IoError(io::Error),
}

impl Error {
    /// Returns `true` for errors after which the session can no longer talk to the device.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConnectionError { .. } | Error::IoError(_))
    }

    pub(crate) fn protocol(description: impl Into<String>) -> Error {
        Error::ProtocolError {
            description: description.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionError {
                operation,
                elapsed,
                description,
            } => write!(
                f,
                "connection error during {} after {:?}: {}",
                operation, elapsed, description
            ),
            Error::ProtocolError { description } => write!(f, "protocol error: {}", description),
            Error::DeviceError { operation, state } => {
                write!(f, "{} is not allowed while {}", operation, state)
            }
            Error::OperationTimeout { operation, elapsed } => {
                write!(f, "{} timed out after {:?}", operation, elapsed)
            }
            Error::OperationFail { description } => write!(f, "operation failed: {}", description),
            Error::IoError(err) => write!(f, "io error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

/// A specialized `Result` type for RPLIDAR operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_operation_context() {
        let err = Error::OperationTimeout {
            operation: "get_device_info",
            elapsed: Duration::from_millis(2000),
        };
        assert_eq!(err.to_string(), "get_device_info timed out after 2s");

        let err = Error::DeviceError {
            operation: "start_scan",
            state: SessionState::Disconnected,
        };
        assert_eq!(err.to_string(), "start_scan is not allowed while disconnected");
    }

    #[test]
    fn io_errors_are_fatal() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.is_fatal());
        assert!(!Error::protocol("miss sync").is_fatal());
    }
}
