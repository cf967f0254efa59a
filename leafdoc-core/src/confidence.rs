//! Maps classifier scores of unknown scale onto a percentage.
//!
//! Depending on how the model was exported its scores come back either as a
//! unit fraction, as a percentage, or as a percentage multiplied by another
//! hundred. All three collapse to the same [`Percentage`] here.

use leafdoc_types::Percentage;

/// Inclusive upper bound of the unit-fraction branch.
pub const FRACTION_MAX: f64 = 1.0;
/// Inclusive upper bound of the percentage branch.
pub const PERCENT_MAX: f64 = 100.0;
/// Divisor applied to scores above [`PERCENT_MAX`].
pub const OVERSCALE_DIVISOR: f64 = 100.0;

pub fn normalize(raw: f64) -> Percentage {
    let percent = match raw {
        raw if raw.is_nan() || raw < 0.0 => Percentage::MIN,
        raw if raw <= FRACTION_MAX => raw * 100.0,
        raw if raw <= PERCENT_MAX => raw,
        raw => (raw / OVERSCALE_DIVISOR).min(Percentage::MAX),
    };
    Percentage::clamped(percent)
}
