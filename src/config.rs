//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is built once (defaults, then an optional JSON file,
//! then CLI overrides), validated, and passed by reference into every stage.
//! Nothing downstream mutates it.
//!
//! Example file:
//! ```json
//! {
//!   "growth_mode": "logistic",
//!   "capacity_percentile": 0.5,
//!   "seasonality_strength": 0.1,
//!   "horizon_periods": 18,
//!   "current_period_handling": "extrapolate",
//!   "excluded_periods": ["2023-01-01", "2023-02-01"],
//!   "backtest": { "initial_window": 3, "roll_period": 2, "horizon": 2 }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ConfigError;
use crate::period::is_month_start;

/// Trend shape used by the forecast model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GrowthMode {
    /// Unbounded trend with a fixed yearly seasonality term.
    #[default]
    Linear,
    /// Trend saturating at a capacity derived from a historical quantile.
    Logistic,
}

/// What to do with the partially observed current month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CurrentPeriodHandling {
    /// Drop it from training.
    #[default]
    Exclude,
    /// Scale its count up to a full-month estimate.
    Extrapolate,
}

/// Rolling-origin window sizes, in months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_window: usize,
    pub roll_period: usize,
    pub horizon: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_window: 3,
            roll_period: 2,
            horizon: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub growth_mode: GrowthMode,
    /// Quantile of the training values used for the logistic capacity.
    pub capacity_percentile: f64,
    /// Prior scale on seasonal coefficients in logistic mode.
    pub seasonality_strength: f64,
    pub horizon_periods: usize,
    pub min_observations_required: usize,
    pub current_period_handling: CurrentPeriodHandling,
    pub excluded_periods: BTreeSet<NaiveDate>,
    pub backtest: BacktestConfig,
    /// Coverage of the lower/upper forecast band.
    pub interval_width: f64,
    pub clamp_confidence: bool,
    /// Maximum number of entity fits in flight.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            growth_mode: GrowthMode::Linear,
            capacity_percentile: 0.5,
            seasonality_strength: 0.1,
            horizon_periods: 18,
            min_observations_required: 0,
            current_period_handling: CurrentPeriodHandling::Exclude,
            excluded_periods: BTreeSet::new(),
            backtest: BacktestConfig::default(),
            interval_width: 0.8,
            clamp_confidence: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl PipelineConfig {
    /// Loads a config from a JSON file. Missing keys take their defaults.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file '{path}'"))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file '{path}'"))?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.capacity_percentile) {
            return Err(ConfigError::CapacityPercentile(self.capacity_percentile));
        }
        if !(self.seasonality_strength > 0.0 && self.seasonality_strength.is_finite()) {
            return Err(ConfigError::SeasonalityStrength(self.seasonality_strength));
        }
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(ConfigError::IntervalWidth(self.interval_width));
        }
        if self.horizon_periods == 0 {
            return Err(ConfigError::ZeroWindow("horizon_periods"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroWindow("concurrency"));
        }
        if self.backtest.initial_window == 0 {
            return Err(ConfigError::ZeroWindow("backtest.initial_window"));
        }
        if self.backtest.roll_period == 0 {
            return Err(ConfigError::ZeroWindow("backtest.roll_period"));
        }
        if self.backtest.horizon == 0 {
            return Err(ConfigError::ZeroWindow("backtest.horizon"));
        }
        if let Some(bad) = self.excluded_periods.iter().find(|d| !is_month_start(**d)) {
            return Err(ConfigError::ExcludedPeriod(*bad));
        }
        Ok(())
    }
}
