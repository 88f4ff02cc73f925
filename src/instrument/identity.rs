//! Instrument identity table.
//!
//! The counters in this family do not answer identification queries over the
//! talk-only serial output, so the identity of the device on a port comes from
//! configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Manufacturer placeholder for ports without a configured identity.
pub const GENERIC_MANUFACTURER: &str = "HEWLETT PACKARD / AGILENT";
/// Placeholder for unknown identity fields.
pub const UNKNOWN_FIELD: &str = "<unknown>";

/// Who sits at the other end of a port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentIdentity {
    /// Port address the instrument is attached to
    pub address: String,
    /// Manufacturer name
    pub manufacturer: String,
    /// Model designation (e.g., "53131 A")
    pub model: String,
    /// Serial number
    pub serial_number: String,
    /// Firmware revision, if known
    #[serde(default)]
    pub firmware_version: String,
}

impl InstrumentIdentity {
    /// Placeholder identity for an unlisted address.
    pub fn generic(address: &str) -> Self {
        Self {
            address: address.to_string(),
            manufacturer: GENERIC_MANUFACTURER.to_string(),
            model: UNKNOWN_FIELD.to_string(),
            serial_number: UNKNOWN_FIELD.to_string(),
            firmware_version: String::new(),
        }
    }
}

impl fmt::Display for InstrumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} SN:{} {} @ {}",
            self.manufacturer, self.model, self.serial_number, self.firmware_version, self.address
        )
    }
}

/// Address → identity lookup, case-insensitive on the address.
#[derive(Clone, Debug, Default)]
pub struct IdentityTable {
    entries: HashMap<String, InstrumentIdentity>,
}

impl IdentityTable {
    /// Build from configured entries. Later duplicates win.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = InstrumentIdentity>,
    {
        let entries = entries
            .into_iter()
            .map(|identity| (normalize(&identity.address), identity))
            .collect();
        Self { entries }
    }

    /// Identity configured for `address`, or the generic placeholder.
    pub fn lookup(&self, address: &str) -> InstrumentIdentity {
        match self.entries.get(&normalize(address)) {
            Some(identity) => InstrumentIdentity {
                address: address.trim().to_string(),
                ..identity.clone()
            },
            None => InstrumentIdentity::generic(address.trim()),
        }
    }

    /// Number of configured entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bench_counter() -> InstrumentIdentity {
        InstrumentIdentity {
            address: "COM6".to_string(),
            manufacturer: "HEWLETT PACKARD".to_string(),
            model: "53131 A".to_string(),
            serial_number: "3736A23165".to_string(),
            firmware_version: String::new(),
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = IdentityTable::new([bench_counter()]);
        let identity = table.lookup(" com6 ");
        assert_eq!(identity.model, "53131 A");
        assert_eq!(identity.address, "com6");
    }

    #[test]
    fn test_unknown_address_is_generic() {
        let table = IdentityTable::new([bench_counter()]);
        let identity = table.lookup("/dev/ttyUSB9");
        assert_eq!(identity.manufacturer, GENERIC_MANUFACTURER);
        assert_eq!(identity.model, UNKNOWN_FIELD);
        assert_eq!(identity.serial_number, UNKNOWN_FIELD);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            bench_counter().to_string(),
            "HEWLETT PACKARD 53131 A SN:3736A23165  @ COM6"
        );
    }
}
