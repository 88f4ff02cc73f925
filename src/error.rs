//! Custom error types for the application.
//!
//! This module defines the primary error type, `CounterError`. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle
//! the errors that can occur, from configuration issues to serial transport
//! failures.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically related to file parsing
//!   or format issues in the configuration files.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine,
//!   caught during the validation step.
//! - **`Io`** / **`SerialPort`**: Failures of the underlying serial device.
//! - **`ReadTimeout`**: No complete line arrived within the transport timeout.
//!
//! None of these escape the measurement controller: it absorbs transport errors
//! into empty records and `Timeout` notifications. They are visible to code that
//! talks to a [`crate::adapters::LineTransport`] directly, and to the binary.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, CounterError>;

/// Errors raised by configuration loading and the serial transport.
#[derive(Error, Debug)]
pub enum CounterError {
    /// Configuration file or environment could not be read.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but is logically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure on the serial device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened or configured.
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// Operation needs an open port.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// The device closed the stream.
    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    /// No line terminator arrived in time.
    #[error("Serial read timeout after {0:?}")]
    ReadTimeout(Duration),

    /// Build lacks the serial transport.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// The background measurement loop panicked.
    #[error("Measurement worker panicked")]
    WorkerPanicked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CounterError::Configuration("baud_rate must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: baud_rate must be positive"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = CounterError::ReadTimeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Serial read timeout after 1.5s");
    }
}
