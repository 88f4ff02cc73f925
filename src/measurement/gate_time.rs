//! Nominal gate times of the counter.
//!
//! The counter does not report its gate time over the serial line. It is
//! inferred from the spacing of successive readings (one reading per gate) or
//! configured explicitly, and then used to scale totalize counts.

use serde::{Deserialize, Serialize};

/// Gate time classes the 5313x front panel offers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateTime {
    /// Not estimated.
    #[default]
    Unknown,
    /// 0.1 s
    ZeroPointOne,
    /// 1 s
    One,
    /// 10 s
    Ten,
    /// Anything else.
    Other,
}

impl GateTime {
    /// Gate duration in seconds, 0 when not a nominal class.
    pub fn seconds(self) -> f64 {
        match self {
            Self::ZeroPointOne => 0.1,
            Self::One => 1.0,
            Self::Ten => 10.0,
            Self::Unknown | Self::Other => 0.0,
        }
    }
}

/// Classify a (mean) reading interval in seconds.
///
/// `None` means no interval could be measured.
pub fn classify_gate_time(interval: Option<f64>) -> GateTime {
    let Some(t) = interval else {
        return GateTime::Unknown;
    };
    if t < 1.0 {
        return GateTime::ZeroPointOne;
    }
    match t.trunc() {
        x if x == 1.0 => GateTime::One,
        x if x == 10.0 => GateTime::Ten,
        _ => GateTime::Other,
    }
}

/// Arithmetic mean of the collected intervals, `None` if there are none.
pub fn mean_interval(intervals: &[f64]) -> Option<f64> {
    if intervals.is_empty() {
        return None;
    }
    Some(intervals.iter().sum::<f64>() / intervals.len() as f64)
}
