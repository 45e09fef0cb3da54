//! Trend plus yearly-seasonality regression with optional saturation.
//!
//! The design for a month is `[1, t, sin(2πk·m/12), cos(2πk·m/12) for k in 1..=3]`
//! where `t` is the month offset scaled to `[0, 1]` over the training span and
//! `m` the absolute month number, so seasonal terms are calendar-anchored.
//! Seasonal coefficients carry a ridge penalty of `1 / prior²`, which is the
//! MAP estimate under a zero-mean normal prior with that scale.
//!
//! * Linear growth regresses `y / max|y|` directly.
//! * Logistic growth regresses `logit(y / cap)` (clipped away from 0 and 1)
//!   and maps predictions back through `cap · sigmoid(·)`, so every point and
//!   interval bound stays strictly below `cap`.
//!
//! The uncertainty band is the residual standard deviation in the fitted
//! space times the normal quantile for the configured interval width.

use chrono::NaiveDate;
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use tracing::trace;

use super::ridge::solve_ridge;
use super::{ForecastPoint, ForecastSeries, Forecaster, ModelSettings};
use crate::config::GrowthMode;
use crate::error::FitError;
use crate::period::{add_months, month_index};
use crate::series::Series;
use crate::stats::{quantile, stddev};

const FOURIER_ORDER: usize = 3;
const YEAR_MONTHS: f64 = 12.0;
/// Seasonality prior used in linear mode, where strength is not configurable.
const LINEAR_SEASONALITY_PRIOR: f64 = 10.0;
/// Near-zero penalty on intercept and slope.
const TREND_PENALTY: f64 = 1e-8;
/// Clip for `y / cap` before the logit transform.
const LOGIT_EPS: f64 = 0.01;
const MIN_PERIODS: usize = 2;

#[derive(Debug, Clone)]
pub struct TrendSeasonality {
    settings: ModelSettings,
}

impl TrendSeasonality {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    fn seasonality_penalty(&self) -> f64 {
        let prior = match self.settings.growth {
            GrowthMode::Linear => LINEAR_SEASONALITY_PRIOR,
            GrowthMode::Logistic => self.settings.seasonality_strength,
        };
        1.0 / (prior * prior)
    }
}

/// Parameters of a fitted [`TrendSeasonality`] model.
#[derive(Debug, Clone)]
pub struct FittedTrend {
    growth: GrowthMode,
    origin: i64,
    span: f64,
    /// Target scale in linear mode, capacity in logistic mode.
    scale: f64,
    coefficients: Vec<f64>,
    sigma: f64,
    z: f64,
}

impl FittedTrend {
    /// The saturation ceiling, present only under logistic growth.
    pub fn capacity(&self) -> Option<f64> {
        match self.growth {
            GrowthMode::Linear => None,
            GrowthMode::Logistic => Some(self.scale),
        }
    }

    fn linear_predictor(&self, period: NaiveDate) -> f64 {
        design_row(period, self.origin, self.span)
            .iter()
            .zip(&self.coefficients)
            .map(|(x, b)| x * b)
            .sum()
    }

    fn to_value(&self, eta: f64) -> f64 {
        match self.growth {
            GrowthMode::Linear => eta * self.scale,
            GrowthMode::Logistic => self.scale * sigmoid(eta),
        }
    }
}

fn design_row(period: NaiveDate, origin: i64, span: f64) -> Vec<f64> {
    let m = month_index(period);
    let mut row = Vec::with_capacity(2 + 2 * FOURIER_ORDER);
    row.push(1.0);
    row.push((m - origin) as f64 / span);
    for k in 1..=FOURIER_ORDER {
        let angle = 2.0 * PI * k as f64 * m as f64 / YEAR_MONTHS;
        row.push(angle.sin());
        row.push(angle.cos());
    }
    row
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn interval_z(width: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(0.5 + width / 2.0))
        .unwrap_or(f64::NAN)
}

/// `quantile(values, percentile) + 1`, the logistic saturation ceiling.
pub fn capacity_bound(values: &[f64], percentile: f64) -> Option<f64> {
    quantile(values, percentile).map(|q| q + 1.0)
}

impl Forecaster for TrendSeasonality {
    type Model = FittedTrend;

    fn fit(&self, series: &Series) -> Result<FittedTrend, FitError> {
        let n = series.len();
        if n < MIN_PERIODS {
            return Err(FitError::InsufficientData {
                needed: MIN_PERIODS,
                got: n,
            });
        }
        if series.values.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFiniteInput);
        }

        let origin = month_index(series.periods[0]);
        let span = (month_index(series.periods[n - 1]) - origin) as f64;
        if span <= 0.0 {
            return Err(FitError::InsufficientData {
                needed: MIN_PERIODS,
                got: 1,
            });
        }

        let (scale, target): (f64, Vec<f64>) = match self.settings.growth {
            GrowthMode::Linear => {
                let max_abs = series.values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
                let scale = if max_abs > 0.0 { max_abs } else { 1.0 };
                (scale, series.values.iter().map(|v| v / scale).collect())
            }
            GrowthMode::Logistic => {
                let cap = capacity_bound(&series.values, self.settings.capacity_percentile)
                    .ok_or(FitError::InsufficientData {
                        needed: MIN_PERIODS,
                        got: 0,
                    })?;
                let target = series
                    .values
                    .iter()
                    .map(|v| logit((v / cap).clamp(LOGIT_EPS, 1.0 - LOGIT_EPS)))
                    .collect();
                (cap, target)
            }
        };

        let x: Vec<Vec<f64>> = series
            .periods
            .iter()
            .map(|p| design_row(*p, origin, span))
            .collect();

        let seasonal = self.seasonality_penalty();
        let penalty: Vec<f64> = (0..x[0].len())
            .map(|i| if i < 2 { TREND_PENALTY } else { seasonal })
            .collect();

        let coefficients = solve_ridge(&x, &target, &penalty).ok_or(FitError::Singular)?;
        if coefficients.iter().any(|b| !b.is_finite()) {
            return Err(FitError::NonFiniteOutput);
        }

        let residuals: Vec<f64> = x
            .iter()
            .zip(&target)
            .map(|(row, y)| y - row.iter().zip(&coefficients).map(|(a, b)| a * b).sum::<f64>())
            .collect();
        // One degree of freedom per design column, leaving at least one residual.
        let dof = x[0].len().min(n - 1);
        let sigma = stddev(&residuals, 0.0, dof);

        trace!(
            entity = %series.entity_id,
            periods = n,
            scale,
            sigma,
            "Fitted trend model"
        );

        Ok(FittedTrend {
            growth: self.settings.growth,
            origin,
            span,
            scale,
            coefficients,
            sigma,
            z: interval_z(self.settings.interval_width),
        })
    }

    fn predict(
        &self,
        model: &FittedTrend,
        series: &Series,
        horizon: usize,
    ) -> Result<ForecastSeries, FitError> {
        let last = series.last_period().ok_or(FitError::InsufficientData {
            needed: MIN_PERIODS,
            got: 0,
        })?;

        let future = (1..=horizon as u32).map(|i| add_months(last, i));
        let half_width = model.z * model.sigma;

        let points = series
            .periods
            .iter()
            .copied()
            .chain(future)
            .map(|period_start| {
                let eta = model.linear_predictor(period_start);
                let a = model.to_value(eta - half_width);
                let b = model.to_value(eta + half_width);
                ForecastPoint {
                    period_start,
                    entity_id: series.entity_id.clone(),
                    point_estimate: model.to_value(eta),
                    lower_bound: a.min(b),
                    upper_bound: a.max(b),
                }
            })
            .collect::<Vec<_>>();

        if points.iter().any(|p| {
            !(p.point_estimate.is_finite() && p.lower_bound.is_finite() && p.upper_bound.is_finite())
        }) {
            return Err(FitError::NonFiniteOutput);
        }

        Ok(ForecastSeries {
            entity_id: series.entity_id.clone(),
            capacity: model.capacity(),
            points,
        })
    }
}
