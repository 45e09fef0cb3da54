//! End-to-end forecast run.
//!
//! load -> aggregate -> backtest the aggregate -> forecast every entity ->
//! assemble. `as_of` and `generated_at` are parameters so two runs over the
//! same input differ only in the timestamp column.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregate::aggregate;
use crate::backtest::{BacktestReport, backtest};
use crate::config::PipelineConfig;
use crate::history::{self, Observation, RawRow};
use crate::model::{Forecaster, ModelSettings, TrendSeasonality};
use crate::output::{self, OutputRow};
use crate::report::{RunReport, stale_entities};
use crate::runner::{ScoringContext, run_batch};
use crate::series::Series;
use crate::storage::{Location, ObjectStore, read_bytes, write_bytes};

/// Rows to publish plus the summary of how they were produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub rows: Vec<OutputRow>,
    pub report: RunReport,
}

fn load_observations(
    raw: Vec<RawRow>,
    config: &PipelineConfig,
    as_of: NaiveDate,
) -> Result<Vec<Observation>> {
    config.validate().context("validating configuration")?;
    let observations = history::load(raw, config, as_of).context("loading history")?;
    Ok(observations)
}

async fn evaluate<F>(
    forecaster: &Arc<F>,
    total: Series,
    config: &PipelineConfig,
) -> Result<BacktestReport>
where
    F: Forecaster + 'static,
{
    let forecaster = forecaster.clone();
    let windows = config.backtest;
    let report =
        tokio::task::spawn_blocking(move || backtest(forecaster.as_ref(), &total, &windows))
            .await
        .context("backtest task")?
        .context("backtesting aggregate series")?;
    Ok(report)
}

/// Runs the full pipeline over already-parsed rows with a caller-supplied
/// model.
#[tracing::instrument(skip_all, fields(rows = raw.len(), as_of = %as_of))]
pub async fn forecast_history_with<F>(
    forecaster: Arc<F>,
    raw: Vec<RawRow>,
    config: &PipelineConfig,
    as_of: NaiveDate,
    generated_at: DateTime<Utc>,
) -> Result<RunOutput>
where
    F: Forecaster + 'static,
{
    let observations = load_observations(raw, config, as_of)?;
    let aggregated = aggregate(&observations);

    let backtest = evaluate(&forecaster, aggregated.total, config).await?;

    let ctx = ScoringContext {
        accuracy_term: backtest.accuracy_term,
        horizon: config.horizon_periods,
        min_observations: config.min_observations_required,
        clamp_confidence: config.clamp_confidence,
    };
    let batch = run_batch(forecaster, aggregated.entities, ctx, config.concurrency).await;

    let rows = output::assemble(&batch.scored, as_of, generated_at);
    for entity_id in stale_entities(&batch, &rows) {
        warn!(%entity_id, %as_of, "Forecast horizon ends before the current period");
    }
    let report = RunReport::new(
        generated_at,
        as_of,
        config.growth_mode,
        &backtest,
        &batch,
        &rows,
    );

    Ok(RunOutput { rows, report })
}

/// [`forecast_history_with`] using the bundled trend/seasonality model.
pub async fn forecast_history(
    raw: Vec<RawRow>,
    config: &PipelineConfig,
    as_of: NaiveDate,
    generated_at: DateTime<Utc>,
) -> Result<RunOutput> {
    let model = Arc::new(TrendSeasonality::new(ModelSettings::from_config(config)));
    forecast_history_with(model, raw, config, as_of, generated_at).await
}

async fn read_history(store: &dyn ObjectStore, input: &Location) -> Result<Vec<RawRow>> {
    let bytes = read_bytes(store, input)
        .await
        .with_context(|| format!("reading history from {input}"))?;
    let raw = history::parse_csv(bytes.as_slice()).context("loading history")?;
    info!(%input, rows = raw.len(), "History read");
    Ok(raw)
}

/// Reads history from `input`, forecasts it and overwrites `output` (and
/// `report_location` when given) with the results.
#[tracing::instrument(skip_all, fields(input = %input, output = %output))]
pub async fn run(
    store: &dyn ObjectStore,
    input: &Location,
    output: &Location,
    report_location: Option<&Location>,
    config: &PipelineConfig,
    as_of: NaiveDate,
    generated_at: DateTime<Utc>,
) -> Result<RunReport> {
    let raw = read_history(store, input).await?;
    let result = forecast_history(raw, config, as_of, generated_at).await?;

    let csv = output::to_csv(&result.rows).context("encoding forecast")?;
    write_bytes(store, output, csv)
        .await
        .with_context(|| format!("writing forecast to {output}"))?;

    if let Some(location) = report_location {
        let json = serde_json::to_vec_pretty(&result.report)?;
        write_bytes(store, location, json)
            .await
            .with_context(|| format!("writing run report to {location}"))?;
    }

    Ok(result.report)
}

/// Loads and aggregates history from `input` and backtests the aggregate
/// without forecasting entities or writing anything.
#[tracing::instrument(skip_all, fields(input = %input, as_of = %as_of))]
pub async fn run_backtest(
    store: &dyn ObjectStore,
    input: &Location,
    config: &PipelineConfig,
    as_of: NaiveDate,
) -> Result<BacktestReport> {
    let raw = read_history(store, input).await?;
    let observations = load_observations(raw, config, as_of)?;
    let aggregated = aggregate(&observations);

    let model = Arc::new(TrendSeasonality::new(ModelSettings::from_config(config)));
    evaluate(&model, aggregated.total, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrowthMode;
    use crate::error::{BacktestError, DataQualityError};
    use crate::period::{add_months, month_start};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn get(&self, location: &Location) -> Result<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(&location.to_string())
                .cloned()
                .with_context(|| format!("no object at {location}"))
        }

        async fn put(&self, location: &Location, body: Vec<u8>) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(location.to_string(), body);
            Ok(())
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn rows(entity: &str, start: NaiveDate, values: &[f64]) -> Vec<RawRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RawRow {
                entity_id: Some(entity.to_string()),
                period_start: Some(add_months(start, i as u32).to_string()),
                count: Some(*v),
            })
            .collect()
    }

    /// Two years of two growing entities plus a partial current month.
    fn history() -> Vec<RawRow> {
        let start = d(2023, 1, 1);
        let aws: Vec<f64> = (0..25).map(|i| 100.0 + 5.0 * i as f64).collect();
        let gcp: Vec<f64> = (0..25).map(|i| 40.0 + (i % 12) as f64).collect();
        let mut raw = rows("aws", start, &aws);
        raw.extend(rows("gcp", start, &gcp));
        raw
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            concurrency: 2,
            ..PipelineConfig::default()
        }
    }

    fn stamp(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_forecast_emits_horizon_from_current_month() {
        let as_of = d(2025, 1, 15);
        let out = forecast_history(history(), &config(), as_of, stamp(6))
            .await
            .unwrap();

        // history ends Dec 2024 once Jan 2025 is dropped; 18 months follow
        assert_eq!(out.rows.len(), 2 * 18);
        assert!(out.rows.iter().all(|r| r.period_start >= month_start(as_of)));
        assert!(out.rows.iter().all(|r| r.point_estimate >= 0.0));
        assert_eq!(out.rows[0].entity_id, "aws");
        assert_eq!(out.rows[0].period_start, d(2025, 1, 1));
        assert_eq!(out.report.entities_scored, 2);
        assert!(out.report.failures.is_empty());
        assert_eq!(out.report.rows_written, 36);
    }

    #[tokio::test]
    async fn test_runs_differ_only_in_generated_at() {
        let as_of = d(2025, 1, 15);
        let first = forecast_history(history(), &config(), as_of, stamp(6)).await.unwrap();
        let second = forecast_history(history(), &config(), as_of, stamp(9)).await.unwrap();

        assert_eq!(first.rows.len(), second.rows.len());
        for (a, b) in first.rows.iter().zip(&second.rows) {
            assert_eq!(
                OutputRow {
                    generated_at: b.generated_at,
                    ..a.clone()
                },
                *b
            );
            assert_ne!(a.generated_at, b.generated_at);
        }
    }

    #[tokio::test]
    async fn test_short_entity_is_listed_not_fatal() {
        let mut raw = history();
        raw.extend(rows("onprem", d(2024, 12, 1), &[7.0]));

        let out = forecast_history(raw, &config(), d(2025, 1, 15), stamp(6))
            .await
            .unwrap();

        assert_eq!(out.report.entities_total, 3);
        assert_eq!(out.report.entities_scored, 2);
        assert_eq!(out.report.failures.len(), 1);
        assert_eq!(out.report.failures[0].entity_id, "onprem");
        assert!(out.rows.iter().all(|r| r.entity_id != "onprem"));
    }

    #[tokio::test]
    async fn test_entity_ending_before_horizon_is_reported() {
        let mut raw = rows("live", d(2023, 1, 1), &[50.0; 24]);
        raw.extend(rows("stale", d(2021, 1, 1), &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]));

        let out = forecast_history(raw, &config(), d(2025, 1, 15), stamp(6))
            .await
            .unwrap();

        assert_eq!(out.report.entities_total, 2);
        assert_eq!(out.report.entities_scored, 1);
        assert_eq!(out.report.failures.len(), 1);
        assert_eq!(out.report.failures[0].entity_id, "stale");
        assert_eq!(
            out.report.failures[0].reason,
            "no forecast periods at or after 2025-01-01"
        );
        assert!(out.rows.iter().all(|r| r.entity_id == "live"));
        assert_eq!(out.report.rows_written, 18);
    }

    #[tokio::test]
    async fn test_malformed_row_aborts_with_stage() {
        let mut raw = history();
        raw.push(RawRow {
            entity_id: Some("aws".into()),
            period_start: Some("2024-03-15".into()),
            count: Some(1.0),
        });

        let err = forecast_history(raw, &config(), d(2025, 1, 15), stamp(6))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "loading history");
        assert!(matches!(
            err.downcast_ref::<DataQualityError>(),
            Some(DataQualityError::NotMonthStart { row: 51, .. })
        ));
    }

    #[tokio::test]
    async fn test_too_little_history_fails_backtest() {
        let raw = rows("aws", d(2024, 10, 1), &[1.0, 2.0, 3.0]);
        let err = forecast_history(raw, &config(), d(2025, 1, 15), stamp(6))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "backtesting aggregate series");
        assert!(err.downcast_ref::<BacktestError>().is_some());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_loading() {
        let config = PipelineConfig {
            capacity_percentile: 1.5,
            ..config()
        };
        let err = forecast_history(history(), &config, d(2025, 1, 15), stamp(6))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "validating configuration");
    }

    #[tokio::test]
    async fn test_run_writes_table_and_report() {
        let store = MemoryStore::default();
        let input = Location::parse("s3://bucket/history.csv").unwrap();
        let output = Location::parse("s3://bucket/forecast.csv").unwrap();
        let report = Location::parse("s3://bucket/report.json").unwrap();

        let mut csv = String::from("entity_id,period_start,count\n");
        for row in history() {
            csv.push_str(&format!(
                "{},{},{}\n",
                row.entity_id.unwrap(),
                row.period_start.unwrap(),
                row.count.unwrap()
            ));
        }
        store.put(&input, csv.into_bytes()).await.unwrap();

        let config = PipelineConfig {
            growth_mode: GrowthMode::Logistic,
            ..config()
        };
        let summary = run(
            &store,
            &input,
            &output,
            Some(&report),
            &config,
            d(2025, 1, 15),
            stamp(6),
        )
        .await
        .unwrap();

        let written = output::from_csv(&store.get(&output).await.unwrap()).unwrap();
        assert_eq!(written.len(), summary.rows_written);

        let json: serde_json::Value =
            serde_json::from_slice(&store.get(&report).await.unwrap()).unwrap();
        assert_eq!(json["growth_mode"], "logistic");
        assert_eq!(json["entities_scored"], 2);
    }

    #[tokio::test]
    async fn test_missing_input_names_location() {
        let store = MemoryStore::default();
        let input = Location::parse("s3://bucket/missing.csv").unwrap();
        let err = run_backtest(&store, &input, &config(), d(2025, 1, 15))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "reading history from s3://bucket/missing.csv");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn rows_start_at_current_month_and_are_non_negative(
            day in 1u32..=28,
            slope in -8.0f64..8.0,
            logistic in any::<bool>(),
        ) {
            let start = d(2023, 1, 1);
            let values: Vec<f64> = (0..25)
                .map(|i| (60.0 + slope * i as f64 + (i % 4) as f64).max(1.0))
                .collect();
            let raw = rows("aws", start, &values);
            let as_of = d(2025, 1, day);
            let config = PipelineConfig {
                growth_mode: if logistic { GrowthMode::Logistic } else { GrowthMode::Linear },
                ..config()
            };

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let out = runtime
                .block_on(forecast_history(raw, &config, as_of, stamp(6)))
                .unwrap();

            prop_assert!(!out.rows.is_empty());
            for row in &out.rows {
                prop_assert!(row.period_start >= month_start(as_of));
                prop_assert!(row.point_estimate >= 0.0);
            }
        }
    }
}
