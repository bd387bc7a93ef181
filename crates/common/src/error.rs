//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Transport-level USB failure
///
/// Mirrors the libusb error codes so any backend can report failures
/// without leaking its own error type through the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    #[error("Operation timed out")]
    Timeout,

    #[error("Endpoint stalled (pipe error)")]
    Pipe,

    #[error("Device disconnected")]
    NoDevice,

    #[error("Entity not found")]
    NotFound,

    #[error("Resource busy")]
    Busy,

    #[error("Overflow")]
    Overflow,

    #[error("Input/output error")]
    Io,

    #[error("Invalid parameter")]
    InvalidParam,

    #[error("Access denied (insufficient permissions)")]
    Access,

    #[error("USB worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("{message}")]
    Other { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_error_display() {
        assert_eq!(UsbError::Timeout.to_string(), "Operation timed out");
        let err = UsbError::Other {
            message: "babble".to_string(),
        };
        assert_eq!(err.to_string(), "babble");
    }

    #[test]
    fn test_usb_error_converts_into_error() {
        let err: Error = UsbError::Busy.into();
        assert!(matches!(err, Error::Usb(UsbError::Busy)));
        assert_eq!(err.to_string(), "USB error: Resource busy");
    }
}
