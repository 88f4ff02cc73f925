//! Measurement types produced by the counter.
//!
//! A counter line is parsed into a [`MeasurementRecord`] carrying a value, a
//! [`UnitSymbol`] and the fine-grained [`MeasureMode`] the unit implies. The
//! controller tracks the coarser, user-facing [`MeasurementMode`] and the
//! nominal [`GateTime`] used to turn totalize counts into frequencies.

pub mod gate_time;
pub mod record;

pub use gate_time::{classify_gate_time, GateTime};
pub use record::MeasurementRecord;

use serde::{Deserialize, Serialize};

/// Unit attached to a reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitSymbol {
    /// Dimensionless, e.g. a ratio.
    Unitless,
    /// Not identified (yet).
    Unknown,
    /// Hertz.
    Hz,
    /// Megahertz.
    MHz,
    /// 1e6 counts, totalize mode.
    MegaCount,
    /// Second.
    Second,
    /// Microsecond.
    Microsecond,
    /// Degree, phase mode.
    Degree,
    /// Volt.
    Volt,
}

impl UnitSymbol {
    /// Resolve a unit token as printed by the counter.
    ///
    /// Matching is case-sensitive; unrecognised tokens yield `None`.
    pub fn from_token(token: &str) -> Option<(Self, MeasureMode)> {
        match token {
            "Hz" => Some((Self::Hz, MeasureMode::Frequency)),
            "MHz" => Some((Self::MHz, MeasureMode::Frequency)),
            "M" => Some((Self::MegaCount, MeasureMode::Totalize)),
            "DEG" => Some((Self::Degree, MeasureMode::Phase)),
            "s" => Some((Self::Second, MeasureMode::Time)),
            "us" => Some((Self::Microsecond, MeasureMode::Time)),
            _ => None,
        }
    }

    /// The wire token for this unit, if the counter prints one.
    pub fn token(self) -> Option<&'static str> {
        match self {
            Self::Hz => Some("Hz"),
            Self::MHz => Some("MHz"),
            Self::MegaCount => Some("M"),
            Self::Degree => Some("DEG"),
            Self::Second => Some("s"),
            Self::Microsecond => Some("us"),
            Self::Unitless | Self::Unknown | Self::Volt => None,
        }
    }

    /// Decimal multiplier applied to the printed number.
    pub fn multiplier(self) -> f64 {
        match self {
            Self::MHz | Self::MegaCount => 1.0e6,
            Self::Microsecond => 1.0e-6,
            _ => 1.0,
        }
    }
}

/// Function the counter was set to when it produced a reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasureMode {
    /// Not determined.
    #[default]
    Unknown,
    /// Frequency.
    Frequency,
    /// Totalize (event counting).
    Totalize,
    /// Frequency ratio.
    Ratio,
    /// Duty cycle.
    DutyCycle,
    /// Phase.
    Phase,
    /// Peak voltage.
    Voltage,
    /// Time interval or period.
    Time,
}

/// Coarse measurement mode exposed to users of the controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementMode {
    /// Neither frequency nor totalize.
    #[default]
    Unknown,
    /// Frequency.
    Frequency,
    /// Totalize.
    Totalize,
}

impl From<MeasureMode> for MeasurementMode {
    fn from(mode: MeasureMode) -> Self {
        match mode {
            MeasureMode::Frequency => Self::Frequency,
            MeasureMode::Totalize => Self::Totalize,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_table() {
        assert_eq!(
            UnitSymbol::from_token("MHz"),
            Some((UnitSymbol::MHz, MeasureMode::Frequency))
        );
        assert_eq!(
            UnitSymbol::from_token("M"),
            Some((UnitSymbol::MegaCount, MeasureMode::Totalize))
        );
        assert_eq!(UnitSymbol::from_token("hz"), None);
        assert_eq!(UnitSymbol::from_token("kHz"), None);
    }

    #[test]
    fn test_tokens_resolve_back() {
        for unit in [
            UnitSymbol::Hz,
            UnitSymbol::MHz,
            UnitSymbol::MegaCount,
            UnitSymbol::Degree,
            UnitSymbol::Second,
            UnitSymbol::Microsecond,
        ] {
            let token = unit.token().unwrap();
            assert_eq!(UnitSymbol::from_token(token).map(|(u, _)| u), Some(unit));
        }
        assert_eq!(UnitSymbol::Volt.token(), None);
    }

    #[test]
    fn test_measurement_mode_is_derived() {
        assert_eq!(
            MeasurementMode::from(MeasureMode::Frequency),
            MeasurementMode::Frequency
        );
        assert_eq!(
            MeasurementMode::from(MeasureMode::Totalize),
            MeasurementMode::Totalize
        );
        assert_eq!(
            MeasurementMode::from(MeasureMode::Phase),
            MeasurementMode::Unknown
        );
    }
}
