//! History loading and cleaning.
//!
//! Raw CSV rows are validated into [`Observation`]s (any malformed row is a
//! fatal [`DataQualityError`]), then trimmed relative to an explicit `as_of`
//! date: the partial current month is either dropped or extrapolated, and
//! configured exclusion periods are removed.

use chrono::{Datelike, NaiveDate};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::io::Read;
use tracing::{debug, info, warn};

use crate::config::{CurrentPeriodHandling, PipelineConfig};
use crate::error::DataQualityError;
use crate::period::{days_in_month, is_month_start, month_start};

/// One input row as read from the source, before validation.
///
/// The legacy column names (`key_field`, `month_start`, `sum_recs`)
/// are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRow {
    #[serde(alias = "key_field")]
    pub entity_id: Option<String>,
    #[serde(alias = "month_start")]
    pub period_start: Option<String>,
    #[serde(alias = "sum_recs")]
    pub count: Option<f64>,
}

/// A validated monthly observation for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entity_id: String,
    pub period_start: NaiveDate,
    pub count: f64,
}

/// Reads raw rows from CSV bytes with a header line.
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<RawRow>, DataQualityError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut rows = Vec::new();

    for result in rdr.deserialize() {
        let row: RawRow = result.map_err(|e| DataQualityError::Csv(e.to_string()))?;
        rows.push(row);
    }

    debug!(rows = rows.len(), "Parsed raw history rows");
    Ok(rows)
}

/// Validates every raw row. Row numbers in errors are 1-based data rows.
pub fn validate(raw: Vec<RawRow>) -> Result<Vec<Observation>, DataQualityError> {
    raw.into_iter()
        .enumerate()
        .map(|(i, row)| validate_row(i + 1, row))
        .collect()
}

fn validate_row(row: usize, raw: RawRow) -> Result<Observation, DataQualityError> {
    let entity_id = raw
        .entity_id
        .filter(|s| !s.is_empty())
        .ok_or(DataQualityError::MissingEntity { row })?;

    let value = raw
        .period_start
        .filter(|s| !s.is_empty())
        .ok_or(DataQualityError::MissingPeriod { row })?;
    let period_start = NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| {
        DataQualityError::UnparseablePeriod {
            row,
            value: value.clone(),
        }
    })?;
    if !is_month_start(period_start) {
        return Err(DataQualityError::NotMonthStart { row, value });
    }

    let count = raw.count.ok_or(DataQualityError::MissingCount { row })?;
    if !count.is_finite() || count < 0.0 {
        return Err(DataQualityError::InvalidCount { row, value: count });
    }

    Ok(Observation {
        entity_id,
        period_start,
        count,
    })
}

/// Trims validated history relative to `as_of`.
///
/// Months after the current one are always dropped, as are the configured
/// exclusion periods. The current month is dropped under
/// [`CurrentPeriodHandling::Exclude`]; under
/// [`CurrentPeriodHandling::Extrapolate`] its count is scaled by
/// `days_in_month / days_elapsed`, where `days_elapsed` counts the completed
/// days before `as_of`. With no completed day the month is dropped.
///
/// Output is ordered by entity descending, then period ascending.
pub fn clean(
    observations: Vec<Observation>,
    config: &PipelineConfig,
    as_of: NaiveDate,
) -> Vec<Observation> {
    let current = month_start(as_of);
    let days_elapsed = as_of.day() - 1;
    let scale = days_in_month(as_of) as f64 / days_elapsed.max(1) as f64;
    let total = observations.len();

    let mut cleaned: Vec<Observation> = observations
        .into_iter()
        .filter(|o| !config.excluded_periods.contains(&o.period_start))
        .filter_map(|mut o| {
            if o.period_start > current {
                return None;
            }
            if o.period_start < current {
                return Some(o);
            }
            match config.current_period_handling {
                CurrentPeriodHandling::Exclude => None,
                CurrentPeriodHandling::Extrapolate if days_elapsed == 0 => None,
                CurrentPeriodHandling::Extrapolate => {
                    o.count *= scale;
                    Some(o)
                }
            }
        })
        .collect();

    cleaned.sort_by(|a, b| {
        b.entity_id
            .cmp(&a.entity_id)
            .then(a.period_start.cmp(&b.period_start))
    });

    let dropped = total - cleaned.len();
    if config.current_period_handling == CurrentPeriodHandling::Extrapolate && days_elapsed == 0 {
        warn!(%as_of, "No completed day in the current month, dropping it instead of extrapolating");
    }
    info!(
        kept = cleaned.len(),
        dropped,
        current_period = %current,
        handling = ?config.current_period_handling,
        "History cleaned"
    );

    cleaned
}

/// Validates and cleans raw rows in one step.
pub fn load(
    raw: Vec<RawRow>,
    config: &PipelineConfig,
    as_of: NaiveDate,
) -> Result<Vec<Observation>, DataQualityError> {
    let observations = validate(raw)?;
    Ok(clean(observations, config, as_of))
}
