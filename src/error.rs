//! Error taxonomy for the forecasting pipeline.
//!
//! [`DataQualityError`], [`BacktestError`] and [`ConfigError`] are fatal and
//! surface to the caller. [`FitError`] is recoverable: the batch runner
//! records it against the entity and moves on.

use thiserror::Error;

/// A malformed input row. Aborts the run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataQualityError {
    #[error("row {row}: missing entity_id")]
    MissingEntity { row: usize },

    #[error("row {row}: missing period_start")]
    MissingPeriod { row: usize },

    #[error("row {row}: period_start {value:?} is not a YYYY-MM-DD date")]
    UnparseablePeriod { row: usize, value: String },

    #[error("row {row}: period_start {value} is not the first day of a month")]
    NotMonthStart { row: usize, value: String },

    #[error("row {row}: missing count")]
    MissingCount { row: usize },

    #[error("row {row}: count {value} is negative or not finite")]
    InvalidCount { row: usize, value: f64 },

    #[error("malformed CSV: {0}")]
    Csv(String),
}

/// A single entity's model could not be fitted or evaluated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("insufficient data: need at least {needed} distinct periods, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("below minimum observations: need {needed}, got {got}")]
    BelowMinimum { needed: usize, got: usize },

    #[error("non-finite value in training series")]
    NonFiniteInput,

    #[error("normal equations are not positive definite")]
    Singular,

    #[error("model produced non-finite output")]
    NonFiniteOutput,

    #[error("fit task aborted: {0}")]
    Aborted(String),
}

/// The aggregate rolling-origin evaluation could not produce an accuracy term.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BacktestError {
    #[error("backtest {0} must be at least one period")]
    EmptyWindow(&'static str),

    #[error("aggregate series has {got} periods, need at least {needed} for one fold")]
    TooShort { needed: usize, got: usize },

    #[error("all {folds} folds contain zero actuals, MAPE is undefined")]
    NoUsableFolds { folds: usize },

    #[error("fold at cutoff {cutoff} failed to fit: {source}")]
    FoldFit {
        cutoff: chrono::NaiveDate,
        #[source]
        source: FitError,
    },
}

/// Rejected configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("capacity_percentile must be within [0, 1], got {0}")]
    CapacityPercentile(f64),

    #[error("seasonality_strength must be positive, got {0}")]
    SeasonalityStrength(f64),

    #[error("interval_width must be within (0, 1), got {0}")]
    IntervalWidth(f64),

    #[error("{0} must be positive")]
    ZeroWindow(&'static str),

    #[error("excluded period {0} is not the first day of a month")]
    ExcludedPeriod(chrono::NaiveDate),
}
