//! Analog front end: switched-gain settings and offset DAC range.
//!
//! A requested gain is realized as a coarse switched-gain amplifier (SGA)
//! setting plus a digital trim of at most ±[`DIGITAL_TRIM_LIMIT`].

use crate::variant::BoardVariant;

/// Largest relative digital gain trim.
pub const DIGITAL_TRIM_LIMIT: f64 = 0.2;

/// Offset DAC full scale, in volts.
pub const V_OFFSET_MAX: f64 = 2.5;

/// Gain assumed for boards with no known gain stage.
pub const DEFAULT_GAIN: f64 = 1.0;

/// Smallest and largest gain the host accepts, in V/V.
pub const GAIN_RANGE: (f64, f64) = (0.1, 25.0);

/// Pixie-4 SGA gains, indexed by SGA setting.
pub const P4_GAINS: [f64; 16] = [
    0.98, 1.21, 1.48, 1.81, 2.19, 2.67, 3.24, 3.93, 4.77, 5.79, 7.02, 8.52, 10.34, 12.55, 15.24,
    18.5,
];

/// Two-step gain stage (Pixie-500e, Pixie-4e 14/500): low and high gain.
pub const TWO_STEP_GAINS: [f64; 2] = [1.0, 2.9];

/// Pixie-4e 16/125 relay/switch gains, ascending.
pub const P4E_16_125_GAINS: [f64; 8] = [1.6, 2.4, 3.5, 5.4, 6.7, 9.9, 14.7, 22.6];

/// SGA codes matching [`P4E_16_125_GAINS`].
pub const P4E_16_125_SGA: [u16; 8] = [0, 2, 4, 6, 1, 3, 5, 7];

/// Upper bounds of the request intervals that select each
/// [`P4E_16_125_GAINS`] entry (the last entry takes everything above).
pub const P4E_16_125_THRESHOLDS: [f64; 7] = [2.0, 2.95, 4.45, 6.05, 8.3, 12.3, 18.65];

/// Choose the SGA setting for a requested gain and return it with the
/// analog gain it provides.
#[must_use]
pub fn select_gain(variant: BoardVariant, requested: f64) -> (u16, f64) {
    match variant {
        BoardVariant::Pixie4 => {
            let mut best = 0;
            for (i, g) in P4_GAINS.iter().enumerate() {
                if (g - requested).abs() < (P4_GAINS[best] - requested).abs() {
                    best = i;
                }
            }
            (best as u16, P4_GAINS[best])
        }
        BoardVariant::Pixie500e | BoardVariant::Pixie4e14x500 => {
            let midpoint = (TWO_STEP_GAINS[0] + TWO_STEP_GAINS[1]) / 2.0;
            if requested > midpoint {
                (1, TWO_STEP_GAINS[1])
            } else {
                (0, TWO_STEP_GAINS[0])
            }
        }
        BoardVariant::Pixie4e16x125 => {
            let i = P4E_16_125_THRESHOLDS
                .iter()
                .position(|&t| requested < t)
                .unwrap_or(P4E_16_125_THRESHOLDS.len());
            (P4E_16_125_SGA[i], P4E_16_125_GAINS[i])
        }
        BoardVariant::Unknown(_) => (0, DEFAULT_GAIN),
    }
}

/// Analog gain provided by an SGA setting.
#[must_use]
pub fn analog_gain(variant: BoardVariant, sga: u16) -> f64 {
    match variant {
        BoardVariant::Pixie4 => P4_GAINS
            .get(usize::from(sga))
            .copied()
            .unwrap_or(DEFAULT_GAIN),
        BoardVariant::Pixie500e | BoardVariant::Pixie4e14x500 => {
            TWO_STEP_GAINS[usize::from(sga & 1)]
        }
        BoardVariant::Pixie4e16x125 => P4E_16_125_SGA
            .iter()
            .position(|&code| code == sga)
            .map_or(DEFAULT_GAIN, |i| P4E_16_125_GAINS[i]),
        BoardVariant::Unknown(_) => DEFAULT_GAIN,
    }
}
