//! Composite confidence score.
//!
//! Blends the run-wide backtest accuracy term with how much history backs a
//! particular entity. A year of monthly data counts as fully sufficient.

use tracing::warn;

/// Months of history at which the sufficiency term saturates.
pub const FULL_HISTORY_PERIODS: usize = 12;

/// `min(1, periods / 12)`.
pub fn sufficiency_term(periods: usize) -> f64 {
    (periods as f64 / FULL_HISTORY_PERIODS as f64).min(1.0)
}

/// `(accuracy_term + sufficiency_term) / 2`.
///
/// A backtest MAPE above 100% makes `accuracy_term` negative and the score can
/// fall below zero; it is only clamped into `[0, 1]` when `clamp` is set.
pub fn score(accuracy_term: f64, periods: usize, clamp: bool) -> f64 {
    let raw = (accuracy_term + sufficiency_term(periods)) / 2.0;
    if (0.0..=1.0).contains(&raw) {
        return raw;
    }
    if clamp {
        raw.clamp(0.0, 1.0)
    } else {
        warn!(score = raw, accuracy_term, periods, "Confidence score outside [0, 1]");
        raw
    }
}
