//! RS-232 transport for the counter.
//!
//! The counter talks 9600 8N1 without handshake by default and terminates each
//! reading with CR LF. Reads go byte by byte through the `serialport` crate with
//! a short internal port timeout, so the overall line timeout is enforced here.

use super::{Connector, LineTransport};
use crate::config::SerialSettings;
use crate::error::{AppResult, CounterError};
use log::debug;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use crate::config::SerialParity;
#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Serial adapter for RS-232 communication
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Response line ending character
    response_delimiter: u8,

    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn SerialPort>>,
}

impl SerialAdapter {
    /// Open `port_name` with the given line settings.
    #[cfg(feature = "instrument_serial")]
    pub fn open(port_name: &str, settings: &SerialSettings) -> AppResult<Self> {
        let data_bits = match settings.data_bits {
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let stop_bits = match settings.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };
        let parity = match settings.parity {
            SerialParity::None => serialport::Parity::None,
            SerialParity::Even => serialport::Parity::Even,
            SerialParity::Odd => serialport::Parity::Odd,
        };

        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.poll_interval())
            .open()?;

        debug!(
            "Serial port '{}' opened at {} baud",
            port_name, settings.baud_rate
        );

        Ok(Self {
            port_name: port_name.to_string(),
            response_delimiter: b'\n',
            port: Some(port),
        })
    }

    /// Open `port_name` with the given line settings.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open(port_name: &str, settings: &SerialSettings) -> AppResult<Self> {
        let _ = (port_name, settings);
        Err(CounterError::SerialFeatureDisabled)
    }

    /// Port this adapter was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(feature = "instrument_serial")]
impl LineTransport for SerialAdapter {
    fn read_line(&mut self, timeout: Duration) -> AppResult<String> {
        use std::io::Read;

        let delimiter = self.response_delimiter;
        let port = self
            .port
            .as_mut()
            .ok_or(CounterError::SerialPortNotConnected)?;

        let mut response: Vec<u8> = Vec::new();
        let mut buffer = [0u8; 1];
        let start = std::time::Instant::now();

        loop {
            if start.elapsed() > timeout {
                return Err(CounterError::ReadTimeout(timeout));
            }

            match port.read(&mut buffer) {
                Ok(1) => {
                    if buffer[0] == delimiter {
                        break;
                    }
                    response.push(buffer[0]);
                }
                Ok(0) => return Err(CounterError::SerialUnexpectedEof),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // Port timeout is shorter than the line timeout
                    continue;
                }
                Err(e) => return Err(e.into()),
                Ok(_) => unreachable!("Read into single-byte buffer returned >1"),
            }
        }

        let line = String::from_utf8_lossy(&response).trim().to_string();
        debug!("[{}] Received line: {}", self.port_name, line);
        Ok(line)
    }

    fn discard_pending_input(&mut self) -> AppResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or(CounterError::SerialPortNotConnected)?;
        port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl LineTransport for SerialAdapter {
    fn read_line(&mut self, _timeout: Duration) -> AppResult<String> {
        Err(CounterError::SerialFeatureDisabled)
    }

    fn discard_pending_input(&mut self) -> AppResult<()> {
        Err(CounterError::SerialFeatureDisabled)
    }

    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// Opens [`SerialAdapter`]s with fixed line settings.
#[derive(Clone, Debug)]
pub struct SerialConnector {
    settings: SerialSettings,
}

impl SerialConnector {
    /// Connector using `settings` for every port it opens.
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl Connector for SerialConnector {
    fn open(&self, address: &str) -> AppResult<Box<dyn LineTransport>> {
        let adapter = SerialAdapter::open(address, &self.settings)?;
        Ok(Box::new(adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_fails() {
        let connector = SerialConnector::new(SerialSettings::default());
        assert!(connector.open("/dev/definitely-not-a-counter").is_err());
    }
}
