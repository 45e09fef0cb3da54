//! Rolling-origin evaluation of the aggregate series.
//!
//! The training cutoff starts at `initial_window` periods and advances by
//! `roll_period`; every fold refits on all data up to the cutoff and is
//! scored on the following `horizon` periods. A fold whose held-out actuals
//! contain a zero has no defined MAPE and is excluded from the mean.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::BacktestConfig;
use crate::error::BacktestError;
use crate::model::Forecaster;
use crate::series::Series;
use crate::stats::mean;

/// Outcome of one train/evaluate cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldResult {
    /// Last period included in training.
    pub cutoff: NaiveDate,
    pub train_periods: usize,
    /// `None` when the held-out window contains a zero actual.
    pub mape: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    /// `1 - mean(fold MAPE)`.
    pub accuracy_term: f64,
    pub mean_mape: f64,
    pub folds: Vec<FoldResult>,
}

impl BacktestReport {
    pub fn folds_used(&self) -> usize {
        self.folds.iter().filter(|f| f.mape.is_some()).count()
    }

    pub fn folds_excluded(&self) -> usize {
        self.folds.len() - self.folds_used()
    }
}

/// Mean absolute percentage error, or `None` if any actual is zero.
pub fn fold_mape(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() || actual.contains(&0.0) {
        return None;
    }
    let errors: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| ((a - p) / a).abs())
        .collect();
    Some(mean(&errors))
}

/// Runs the rolling-origin backtest and derives the global accuracy term.
pub fn backtest<F: Forecaster>(
    forecaster: &F,
    series: &Series,
    windows: &BacktestConfig,
) -> Result<BacktestReport, BacktestError> {
    for (name, size) in [
        ("initial_window", windows.initial_window),
        ("roll_period", windows.roll_period),
        ("horizon", windows.horizon),
    ] {
        if size == 0 {
            return Err(BacktestError::EmptyWindow(name));
        }
    }

    let n = series.len();
    let needed = windows.initial_window + windows.horizon;
    if n < needed {
        return Err(BacktestError::TooShort { needed, got: n });
    }

    let mut folds = Vec::new();
    let mut origin = windows.initial_window;

    while origin + windows.horizon <= n {
        let train = series.head(origin);
        let cutoff = series.periods[origin - 1];

        let forecast = forecaster
            .forecast(&train, windows.horizon)
            .map_err(|source| BacktestError::FoldFit { cutoff, source })?;

        let predicted: Vec<f64> = forecast
            .tail(windows.horizon)
            .iter()
            .map(|p| p.point_estimate)
            .collect();
        let actual = &series.values[origin..origin + windows.horizon];
        let mape = fold_mape(actual, &predicted);

        debug!(%cutoff, train_periods = origin, ?mape, "Backtest fold");
        folds.push(FoldResult {
            cutoff,
            train_periods: origin,
            mape,
        });

        origin += windows.roll_period;
    }

    let scores: Vec<f64> = folds.iter().filter_map(|f| f.mape).collect();
    if scores.is_empty() {
        return Err(BacktestError::NoUsableFolds { folds: folds.len() });
    }

    let mean_mape = mean(&scores);
    let report = BacktestReport {
        accuracy_term: 1.0 - mean_mape,
        mean_mape,
        folds,
    };

    info!(
        folds_used = report.folds_used(),
        folds_excluded = report.folds_excluded(),
        mean_mape,
        accuracy_term = report.accuracy_term,
        "Backtest complete"
    );

    Ok(report)
}
