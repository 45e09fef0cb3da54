//! Forecast model adapter.
//!
//! [`Forecaster`] is the seam between the pipeline and whatever fits the
//! curves. The pipeline only needs `fit` and `predict`; the bundled
//! [`TrendSeasonality`] model is one implementation.

mod ridge;
mod trend;

pub use trend::{FittedTrend, TrendSeasonality, capacity_bound};

use chrono::NaiveDate;

use crate::config::{GrowthMode, PipelineConfig};
use crate::error::FitError;
use crate::series::Series;

/// One predicted month for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub period_start: NaiveDate,
    pub entity_id: String,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Predictions over the full history-plus-horizon timeline of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSeries {
    pub entity_id: String,
    /// Saturation ceiling applied to every point, logistic growth only.
    pub capacity: Option<f64>,
    pub points: Vec<ForecastPoint>,
}

impl ForecastSeries {
    /// The last `n` points, i.e. the forecast tail beyond the training data.
    pub fn tail(&self, n: usize) -> &[ForecastPoint] {
        let start = self.points.len().saturating_sub(n);
        &self.points[start..]
    }
}

/// Model parameters shared by every fit in a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSettings {
    pub growth: GrowthMode,
    pub capacity_percentile: f64,
    pub seasonality_strength: f64,
    pub interval_width: f64,
}

impl ModelSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            growth: config.growth_mode,
            capacity_percentile: config.capacity_percentile,
            seasonality_strength: config.seasonality_strength,
            interval_width: config.interval_width,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// A trend+seasonality model that can be fitted to a monthly series and
/// asked for predictions over history plus a forecast horizon.
pub trait Forecaster: Send + Sync {
    type Model: Send;

    /// Fits the model to `series`.
    fn fit(&self, series: &Series) -> Result<Self::Model, FitError>;

    /// Predicts every historical period of `series` followed by `horizon`
    /// future months.
    fn predict(
        &self,
        model: &Self::Model,
        series: &Series,
        horizon: usize,
    ) -> Result<ForecastSeries, FitError>;

    /// Fits and predicts in one call.
    fn forecast(&self, series: &Series, horizon: usize) -> Result<ForecastSeries, FitError> {
        let model = self.fit(series)?;
        self.predict(&model, series, horizon)
    }
}
