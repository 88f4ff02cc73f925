//! Line-oriented transports to the counter.
//!
//! The measurement controller only needs four things from the link: open it,
//! read one line with a timeout, drop stale input, close it. [`Connector`]
//! opens a connection for an address and hands back a [`LineTransport`].
//!
//! - [`SerialAdapter`] / [`SerialConnector`]: RS-232 via the `serialport`
//!   crate (feature `instrument_serial`).
//! - [`MockAdapter`] / [`MockConnector`]: scripted lines for tests and dry runs.

pub mod mock;
pub mod serial_adapter;

pub use mock::{MockAdapter, MockConnector, MockScript, MockStep, ReadGate};
pub use serial_adapter::{SerialAdapter, SerialConnector};

use crate::error::AppResult;
use std::time::Duration;

/// An open, line-oriented connection.
///
/// `read_line` blocks until a full line arrived or `timeout` elapsed; there is
/// no way to interrupt it from another thread.
pub trait LineTransport: Send {
    /// Read one line, without its terminator.
    fn read_line(&mut self, timeout: Duration) -> AppResult<String>;

    /// Drop everything received but not yet read.
    fn discard_pending_input(&mut self) -> AppResult<()>;

    /// Release the underlying device.
    fn close(&mut self) -> AppResult<()>;
}

/// Opens transports by address.
pub trait Connector: Send + Sync {
    /// Open a connection to `address` (e.g. "/dev/ttyUSB0", "COM3").
    fn open(&self, address: &str) -> AppResult<Box<dyn LineTransport>>;
}
