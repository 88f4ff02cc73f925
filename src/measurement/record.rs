//! Parsing of counter response lines.
//!
//! The 5313x family prints one reading per line, e.g.
//!
//! ```text
//! 1.000000E+03 Hz
//! 1,234 M
//! 12.3 us
//! +5.00V
//! ```
//!
//! A line holds at most two meaningful tokens: a number (with optional `,`
//! grouping) and an optional unit suffix. Parsing never fails; malformed input
//! produces a record whose value is NaN and whose unit and mode are
//! `Unknown`.

use super::{MeasureMode, UnitSymbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading from the counter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// The received line with surrounding whitespace removed.
    pub raw_text: String,
    /// Reading scaled to the base unit, NaN when not numeric.
    pub value: f64,
    /// Unit of `value` (base unit after scaling, see [`UnitSymbol::multiplier`]).
    pub unit: UnitSymbol,
    /// Counter function implied by the unit.
    pub mode: MeasureMode,
    /// UTC time the record was created.
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    frequency_derived: bool,
}

impl Default for MeasurementRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl MeasurementRecord {
    /// A record carrying no reading, stamped with the current time.
    pub fn empty() -> Self {
        Self {
            raw_text: String::new(),
            value: f64::NAN,
            unit: UnitSymbol::Unknown,
            mode: MeasureMode::Unknown,
            timestamp: Utc::now(),
            frequency_derived: false,
        }
    }

    /// Parse one response line, stamped with the current time.
    pub fn parse(line: &str) -> Self {
        let mut record = Self::empty();
        record.raw_text = line.trim().to_string();

        let cleaned = record.raw_text.replace('\r', "");
        let tokens: Vec<&str> = cleaned
            .split(&[' ', '\t'][..])
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() || tokens.len() >= 3 {
            return record;
        }

        // Voltage readings are recognised but not decoded.
        if cleaned.contains('V') {
            record.unit = UnitSymbol::Volt;
            record.mode = MeasureMode::Voltage;
            return record;
        }

        let number = parse_number(&tokens[0].replace(',', ""));

        match tokens.get(1).and_then(|t| UnitSymbol::from_token(t)) {
            Some((unit, mode)) => {
                record.unit = unit;
                record.mode = mode;
                record.value = number * unit.multiplier();
            }
            None => record.value = number,
        }

        record
    }

    /// Reinterpret a totalize count as a frequency over `gate_time_seconds`.
    ///
    /// Records in `Unknown` or `Totalize` mode become `Totalize`/`Hz` with the
    /// count divided by the gate time, and the new value is returned. Records
    /// of any other mode are left alone and their value is returned unchanged.
    ///
    /// A gate time that is zero, negative or not finite means the gate time is
    /// not known yet: NaN is returned and the record is not modified, so the
    /// conversion can still happen later. The conversion is applied at most
    /// once; further calls return the converted value.
    pub fn derive_frequency(&mut self, gate_time_seconds: f64) -> f64 {
        if self.frequency_derived {
            return self.value;
        }
        match self.mode {
            MeasureMode::Unknown | MeasureMode::Totalize => {
                if !gate_time_seconds.is_finite() || gate_time_seconds <= 0.0 {
                    return f64::NAN;
                }
                self.mode = MeasureMode::Totalize;
                self.unit = UnitSymbol::Hz;
                self.value /= gate_time_seconds;
                self.frequency_derived = true;
                self.value
            }
            _ => self.value,
        }
    }

    /// Whether [`Self::derive_frequency`] has already rewritten this record.
    pub fn is_frequency_derived(&self) -> bool {
        self.frequency_derived
    }

    /// Render the reading back into the counter's line format.
    ///
    /// Returns `None` for records without a numeric value (voltage readings,
    /// failed parses).
    pub fn to_line(&self) -> Option<String> {
        if self.value.is_nan() || self.unit == UnitSymbol::Volt {
            return None;
        }
        let printed = self.value / self.unit.multiplier();
        Some(match self.unit.token() {
            Some(token) => format!("{printed:e} {token}"),
            None => format!("{printed:e}"),
        })
    }

    /// Seconds elapsed between `earlier` and this record.
    pub fn seconds_since(&self, earlier: &MeasurementRecord) -> f64 {
        (self.timestamp - earlier.timestamp)
            .num_microseconds()
            .map_or(f64::NAN, |us| us as f64 * 1.0e-6)
    }
}

/// Locale-invariant float parsing: `.` decimal point, optional sign and exponent.
fn parse_number(token: &str) -> f64 {
    let well_formed = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'));
    if !well_formed {
        return f64::NAN;
    }
    token.parse::<f64>().unwrap_or(f64::NAN)
}
