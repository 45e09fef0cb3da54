//! CLI entry point for the capacity forecaster.
//!
//! `forecast` reads monthly history, backtests the aggregate, forecasts every
//! entity and overwrites the output table. `backtest` stops after the
//! aggregate evaluation.

use anyhow::{Context, Result};
use capacity_forecast::config::{CurrentPeriodHandling, GrowthMode, PipelineConfig};
use capacity_forecast::pipeline;
use capacity_forecast::storage::{Location, Storage};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "capacity_forecast")]
#[command(about = "Monthly capacity forecasts with confidence scores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast every entity and overwrite the output table
    Forecast {
        /// History CSV: local path, s3://bucket/key or http(s) URL
        #[arg(short, long, value_name = "LOCATION")]
        input: String,

        /// Where to write the forecast CSV (local path or s3://bucket/key)
        #[arg(short, long, value_name = "LOCATION")]
        output: String,

        /// Optional: where to write the JSON run report
        #[arg(long, value_name = "LOCATION")]
        report: Option<String>,

        #[command(flatten)]
        model: ModelArgs,
    },
    /// Backtest the aggregate series and log the accuracy term
    Backtest {
        /// History CSV: local path, s3://bucket/key or http(s) URL
        #[arg(short, long, value_name = "LOCATION")]
        input: String,

        #[command(flatten)]
        model: ModelArgs,
    },
}

/// Options shared by both subcommands. Anything given here overrides the
/// config file.
#[derive(Args)]
struct ModelArgs {
    /// JSON config file
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Reference date for the current period (defaults to today, UTC)
    #[arg(long, value_name = "YYYY-MM-DD")]
    as_of: Option<NaiveDate>,

    #[arg(long, value_enum)]
    growth: Option<GrowthMode>,

    /// Historical quantile used as the logistic capacity
    #[arg(long, value_name = "P")]
    capacity_percentile: Option<f64>,

    #[arg(long, value_name = "S")]
    seasonality_strength: Option<f64>,

    /// Months to forecast past the last observed period
    #[arg(long, value_name = "N")]
    horizon: Option<usize>,

    /// Entities with fewer observed periods are reported as failures
    #[arg(long, value_name = "N")]
    min_observations: Option<usize>,

    #[arg(long, value_enum)]
    current_period: Option<CurrentPeriodHandling>,

    /// Period to drop from history; repeatable
    #[arg(long = "exclude-period", value_name = "YYYY-MM-DD")]
    exclude_period: Vec<NaiveDate>,

    /// Maximum number of entities fitted at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Clamp confidence scores into [0, 1]
    #[arg(long, default_value_t = false)]
    clamp_confidence: bool,
}

impl ModelArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(growth) = self.growth {
            config.growth_mode = growth;
        }
        if let Some(p) = self.capacity_percentile {
            config.capacity_percentile = p;
        }
        if let Some(s) = self.seasonality_strength {
            config.seasonality_strength = s;
        }
        if let Some(n) = self.horizon {
            config.horizon_periods = n;
        }
        if let Some(n) = self.min_observations {
            config.min_observations_required = n;
        }
        if let Some(handling) = self.current_period {
            config.current_period_handling = handling;
        }
        config.excluded_periods.extend(self.exclude_period.iter().copied());
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        if self.clamp_confidence {
            config.clamp_confidence = true;
        }

        config.validate().context("validating configuration")?;
        Ok(config)
    }

    fn as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/capacity_forecast.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("capacity_forecast.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let store = Storage::new();

    match cli.command {
        Commands::Forecast {
            input,
            output,
            report,
            model,
        } => {
            let config = model.resolve()?;
            let input = Location::parse(&input)?;
            let output = Location::parse(&output)?;
            let report = report.as_deref().map(Location::parse).transpose()?;
            let as_of = model.as_of();

            info!(
                %input,
                %output,
                %as_of,
                growth = ?config.growth_mode,
                horizon = config.horizon_periods,
                concurrency = config.concurrency,
                "Starting forecast run"
            );

            let summary = pipeline::run(
                &store,
                &input,
                &output,
                report.as_ref(),
                &config,
                as_of,
                Utc::now(),
            )
            .await?;

            for failure in &summary.failures {
                warn!(entity_id = %failure.entity_id, reason = %failure.reason, "Entity skipped");
            }
            info!(
                accuracy_term = summary.accuracy_term,
                entities_scored = summary.entities_scored,
                entities_failed = summary.failures.len(),
                rows_written = summary.rows_written,
                "Forecast run complete"
            );
        }
        Commands::Backtest { input, model } => {
            let config = model.resolve()?;
            let input = Location::parse(&input)?;
            let as_of = model.as_of();

            let report = pipeline::run_backtest(&store, &input, &config, as_of).await?;

            for fold in &report.folds {
                info!(
                    cutoff = %fold.cutoff,
                    train_periods = fold.train_periods,
                    mape = ?fold.mape,
                    "Fold"
                );
            }
            info!(
                accuracy_term = report.accuracy_term,
                mean_mape = report.mean_mape,
                folds_used = report.folds_used(),
                folds_excluded = report.folds_excluded(),
                "Backtest complete"
            );
        }
    }

    Ok(())
}
