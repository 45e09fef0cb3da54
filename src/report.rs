//! Run summary written next to the forecast table.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::backtest::BacktestReport;
use crate::config::GrowthMode;
use crate::output::OutputRow;
use crate::period::month_start;
use crate::runner::BatchResult;

/// An entity that produced no forecast, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEntry {
    pub entity_id: String,
    pub reason: String,
}

/// Distribution of `confidence_score` over the emitted rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl ConfidenceSummary {
    pub fn from_rows(rows: &[OutputRow]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let scores: Vec<f64> = rows.iter().map(|r| r.confidence_score).collect();
        Some(Self {
            mean: crate::stats::mean(&scores),
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub as_of: NaiveDate,
    pub growth_mode: GrowthMode,
    pub accuracy_term: f64,
    pub mean_mape: f64,
    pub folds_used: usize,
    pub folds_excluded: usize,
    pub entities_total: usize,
    pub entities_scored: usize,
    pub failures: Vec<FailureEntry>,
    pub confidence: Option<ConfidenceSummary>,
    pub rows_written: usize,
}

impl RunReport {
    pub fn new(
        generated_at: DateTime<Utc>,
        as_of: NaiveDate,
        growth_mode: GrowthMode,
        backtest: &BacktestReport,
        batch: &BatchResult,
        rows: &[OutputRow],
    ) -> Self {
        let stale = stale_entities(batch, rows);
        let current = month_start(as_of);
        let mut failures: Vec<FailureEntry> = batch
            .failed
            .iter()
            .map(|f| FailureEntry {
                entity_id: f.entity_id.clone(),
                reason: f.reason.to_string(),
            })
            .chain(stale.iter().map(|id| FailureEntry {
                entity_id: id.to_string(),
                reason: format!("no forecast periods at or after {current}"),
            }))
            .collect();
        failures.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

        Self {
            generated_at,
            as_of,
            growth_mode,
            accuracy_term: backtest.accuracy_term,
            mean_mape: backtest.mean_mape,
            folds_used: backtest.folds_used(),
            folds_excluded: backtest.folds_excluded(),
            entities_total: batch.scored.len() + batch.failed.len(),
            entities_scored: batch.scored.len() - stale.len(),
            failures,
            confidence: ConfidenceSummary::from_rows(rows),
            rows_written: rows.len(),
        }
    }
}

/// Scored entities whose forecast ends before the current period and so
/// contributed no rows.
pub fn stale_entities<'a>(batch: &'a BatchResult, rows: &[OutputRow]) -> Vec<&'a str> {
    let emitted: BTreeSet<&str> = rows.iter().map(|r| r.entity_id.as_str()).collect();
    batch
        .scored
        .iter()
        .map(|f| f.entity_id.as_str())
        .filter(|id| !emitted.contains(id))
        .collect()
}
