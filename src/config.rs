//! Configuration loading using Figment.
//!
//! Settings are read from a TOML file (by default `config/default.toml`) and
//! then overridden by environment variables with the `HPCOUNTER_` prefix.
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! HPCOUNTER_SERIAL__PORT=/dev/ttyUSB1
//! HPCOUNTER_SERIAL__READ_TIMEOUT_MS=5000
//! HPCOUNTER_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! Every section has defaults, so an empty or missing file yields a usable
//! configuration for a counter on the first serial port at 9600 8N1.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! read_timeout_ms = 20000
//!
//! [acquisition]
//! gate_estimate_samples = 3
//!
//! [[instruments]]
//! address = "/dev/ttyUSB0"
//! manufacturer = "HEWLETT PACKARD"
//! model = "53131 A"
//! serial_number = "3736A21306"
//! ```

use crate::error::{AppResult, CounterError};
use crate::instrument::identity::InstrumentIdentity;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Serial link to the counter
    #[serde(default)]
    pub serial: SerialSettings,
    /// Polling loop and gate time handling
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Identity table, keyed by port address
    #[serde(default)]
    pub instruments: Vec<InstrumentIdentity>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Parity modes for serial communication
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Configuration for the serial port connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Path to the serial device (e.g., "/dev/ttyUSB0", "COM3")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (7 or 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity setting
    #[serde(default)]
    pub parity: SerialParity,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// How long a single line read may take before it counts as a timeout.
    /// The counter prints once per gate, so this must exceed the longest gate.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Internal port timeout between polls of the device
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: SerialParity::None,
            stop_bits: default_stop_bits(),
            read_timeout_ms: default_read_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SerialSettings {
    /// Line read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Internal poll interval of the port.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Measurement loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Number of valid samples before the loop stops; unlimited if absent
    #[serde(default)]
    pub sample_limit: Option<u64>,
    /// Samples averaged when estimating the gate time
    #[serde(default = "default_gate_estimate_samples")]
    pub gate_estimate_samples: usize,
    /// Gate time in seconds to force instead of estimating
    #[serde(default)]
    pub gate_time: Option<f64>,
    /// Treat bare numbers as totalize counts
    #[serde(default)]
    pub force_totalize: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sample_limit: None,
            gate_estimate_samples: default_gate_estimate_samples(),
            gate_time: None,
            force_totalize: false,
        }
    }
}

fn default_name() -> String {
    "hp_counter".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> String {
    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyS0".to_string()
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_read_timeout_ms() -> u64 {
    20_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_gate_estimate_samples() -> usize {
    3
}

impl Settings {
    /// Load settings from `path` (or [`DEFAULT_CONFIG_PATH`]) and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn new(path: Option<&Path>) -> AppResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let settings: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("HPCOUNTER_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string, without consulting the environment.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::string(toml))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(CounterError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(CounterError::Configuration(
                "serial.port cannot be empty".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(CounterError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }
        if !matches!(self.serial.data_bits, 7 | 8) {
            return Err(CounterError::Configuration(format!(
                "Invalid serial.data_bits {}. Must be 7 or 8",
                self.serial.data_bits
            )));
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            return Err(CounterError::Configuration(format!(
                "Invalid serial.stop_bits {}. Must be 1 or 2",
                self.serial.stop_bits
            )));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(CounterError::Configuration(
                "serial.read_timeout_ms must be positive".to_string(),
            ));
        }
        if self.serial.poll_interval_ms == 0 {
            return Err(CounterError::Configuration(
                "serial.poll_interval_ms must be positive".to_string(),
            ));
        }

        let mut addresses = HashSet::new();
        for instrument in &self.instruments {
            if !addresses.insert(instrument.address.to_uppercase()) {
                return Err(CounterError::Configuration(format!(
                    "Duplicate instrument address: '{}'",
                    instrument.address
                )));
            }
        }

        Ok(())
    }
}
