use capacity_forecast::config::{CurrentPeriodHandling, GrowthMode, PipelineConfig};
use capacity_forecast::history::RawRow;
use capacity_forecast::output::from_csv;
use capacity_forecast::period::add_months;
use capacity_forecast::pipeline::{forecast_history, run, run_backtest};
use capacity_forecast::storage::{Location, Storage, read_bytes};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/history.csv");

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn stamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 20, 4, 0, 0).unwrap()
}

fn config() -> PipelineConfig {
    PipelineConfig {
        concurrency: 2,
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_full_pipeline_local() {
    let dir = tempfile::tempdir().unwrap();
    let input = Location::parse(FIXTURE).unwrap();
    let output = Location::Local(dir.path().join("out/forecast.csv"));
    let report = Location::Local(dir.path().join("out/report.json"));
    let store = Storage::new();

    let summary = run(
        &store,
        &input,
        &output,
        Some(&report),
        &config(),
        d(2025, 1, 20),
        stamp(),
    )
    .await
    .expect("pipeline run failed");

    // onprem has a single month of history and is listed, not fatal
    assert_eq!(summary.entities_total, 3);
    assert_eq!(summary.entities_scored, 2);
    assert_eq!(summary.failures[0].entity_id, "onprem");

    let rows = from_csv(&std::fs::read(dir.path().join("out/forecast.csv")).unwrap()).unwrap();
    assert_eq!(rows.len(), 2 * 18);
    assert_eq!(rows[0].period_start, d(2025, 1, 1));
    assert_eq!(rows[17].period_start, d(2026, 6, 1));
    assert!(rows.iter().all(|r| r.generated_at == stamp()));
    assert!(rows.iter().all(|r| r.point_estimate >= 0.0));
    assert!(rows.iter().all(|r| r.entity_id != "onprem"));

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("out/report.json")).unwrap())
            .unwrap();
    assert_eq!(json["rows_written"], 36);
    assert_eq!(json["failures"][0]["entity_id"], "onprem");
}

#[tokio::test]
async fn test_extrapolated_current_month_is_forecast_from_history() {
    let dir = tempfile::tempdir().unwrap();
    let input = Location::parse(FIXTURE).unwrap();
    let output = Location::Local(dir.path().join("forecast.csv.gz"));
    let store = Storage::new();

    let config = PipelineConfig {
        current_period_handling: CurrentPeriodHandling::Extrapolate,
        ..config()
    };
    run(&store, &input, &output, None, &config, d(2025, 1, 11), stamp())
        .await
        .unwrap();

    let rows = from_csv(&read_bytes(&store, &output).await.unwrap()).unwrap();
    // January is now training data; it is still emitted alongside 18 future months
    assert_eq!(rows.len(), 2 * 19);
    assert_eq!(rows[0].period_start, d(2025, 1, 1));
    assert_eq!(rows[18].period_start, d(2026, 7, 1));
}

#[tokio::test]
async fn test_rerun_overwrites_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = Location::parse(FIXTURE).unwrap();
    let output = Location::Local(dir.path().join("forecast.csv"));
    let store = Storage::new();

    let short = PipelineConfig {
        horizon_periods: 3,
        ..config()
    };
    run(&store, &input, &output, None, &config(), d(2025, 1, 20), stamp())
        .await
        .unwrap();
    run(&store, &input, &output, None, &short, d(2025, 1, 20), stamp())
        .await
        .unwrap();

    let rows = from_csv(&std::fs::read(dir.path().join("forecast.csv")).unwrap()).unwrap();
    assert_eq!(rows.len(), 2 * 3);
}

#[tokio::test]
async fn test_backtest_only() {
    let store = Storage::new();
    let input = Location::parse(FIXTURE).unwrap();

    let report = run_backtest(&store, &input, &config(), d(2025, 1, 20))
        .await
        .unwrap();

    // 24 aggregate months: cutoffs after 3, 5, ..., 21
    assert_eq!(report.folds.len(), 10);
    assert_eq!(report.folds_excluded(), 0);
    assert!(report.accuracy_term > 0.5 && report.accuracy_term <= 1.0);
}

fn flat_history(entity: &str, months: u32, value: f64) -> Vec<RawRow> {
    (0..months)
        .map(|i| {
            let period = add_months(d(2023, 1, 1), i);
            RawRow {
                entity_id: Some(entity.to_string()),
                period_start: Some(period.to_string()),
                count: Some(value),
            }
        })
        .collect()
}

#[tokio::test]
async fn test_flat_history_forecasts_flat() {
    let raw = flat_history("flat", 24, 100.0);
    let out = forecast_history(raw, &config(), d(2025, 1, 5), stamp())
        .await
        .unwrap();

    assert_eq!(out.rows.len(), 18);
    for row in &out.rows {
        assert!(
            (95.0..=105.0).contains(&row.point_estimate),
            "{} forecast {}",
            row.period_start,
            row.point_estimate
        );
    }
    assert!(out.report.accuracy_term > 0.95);
}

#[tokio::test]
async fn test_logistic_growth_stays_under_capacity() {
    let raw: Vec<RawRow> = flat_history("ramp", 24, 0.0)
        .into_iter()
        .enumerate()
        .map(|(i, mut row)| {
            row.count = Some(50.0 + 10.0 * i as f64);
            row
        })
        .collect();
    let config = PipelineConfig {
        growth_mode: GrowthMode::Logistic,
        ..config()
    };

    let out = forecast_history(raw, &config, d(2025, 1, 5), stamp())
        .await
        .unwrap();

    // median of 50..=280 step 10 is 165, capacity 166
    assert!(!out.rows.is_empty());
    assert!(out.rows.iter().all(|r| r.point_estimate <= 166.0));
}

#[tokio::test]
async fn test_malformed_fixture_names_the_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    std::fs::write(
        &path,
        "entity_id,period_start,count\naws,2024-01-01,3\naws,2024-02-01,-1\n",
    )
    .unwrap();

    let store = Storage::new();
    let err = run_backtest(&store, &Location::Local(path), &config(), d(2025, 1, 5))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "loading history");
    assert!(format!("{err:#}").contains("row 2"));
}
