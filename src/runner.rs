//! Per-entity batch runner.
//!
//! Every entity moves through `Pending -> Fitting -> {Scored | Failed}`
//! independently, tracked in a per-run state table. Fits run on the blocking
//! pool, at most `concurrency` at a time; a failing (or panicking) fit only
//! ever fails its own entity. Each task owns its result slot and slots are
//! merged in entity order, so the output does not depend on completion order.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::confidence;
use crate::error::FitError;
use crate::model::{ForecastPoint, Forecaster};
use crate::series::Series;

/// Read-only inputs shared by every entity in a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringContext {
    /// Global term from the aggregate backtest.
    pub accuracy_term: f64,
    pub horizon: usize,
    pub min_observations: usize,
    pub clamp_confidence: bool,
}

/// A successfully forecast entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityForecast {
    pub entity_id: String,
    pub observed_periods: usize,
    pub confidence: f64,
    pub capacity: Option<f64>,
    /// History plus horizon, `point_estimate` clamped to be non-negative.
    pub points: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityFailure {
    pub entity_id: String,
    pub reason: FitError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityState {
    Pending,
    Fitting,
    Scored(EntityForecast),
    Failed(FitError),
}

/// Merged outcome of a batch, both lists ordered by entity id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub scored: Vec<EntityForecast>,
    pub failed: Vec<EntityFailure>,
}

/// Fits, predicts and scores one entity, returning its terminal state.
pub fn run_entity<F: Forecaster>(
    forecaster: &F,
    series: &Series,
    ctx: &ScoringContext,
) -> EntityState {
    if series.len() < ctx.min_observations {
        return EntityState::Failed(FitError::BelowMinimum {
            needed: ctx.min_observations,
            got: series.len(),
        });
    }

    debug!(periods = series.len(), "Fitting entity");

    match forecaster.forecast(series, ctx.horizon) {
        Ok(forecast) => {
            let confidence =
                confidence::score(ctx.accuracy_term, series.len(), ctx.clamp_confidence);
            let points = forecast
                .points
                .into_iter()
                .map(|mut p| {
                    p.point_estimate = p.point_estimate.max(0.0);
                    p
                })
                .collect();

            EntityState::Scored(EntityForecast {
                entity_id: series.entity_id.clone(),
                observed_periods: series.len(),
                confidence,
                capacity: forecast.capacity,
                points,
            })
        }
        Err(reason) => EntityState::Failed(reason),
    }
}

/// Forecasts and scores every entity on a bounded worker pool.
#[tracing::instrument(skip_all, fields(entities = entities.len(), concurrency = concurrency))]
pub async fn run_batch<F>(
    forecaster: Arc<F>,
    entities: BTreeMap<String, Series>,
    ctx: ScoringContext,
    concurrency: usize,
) -> BatchResult
where
    F: Forecaster + 'static,
{
    let mut states: BTreeMap<String, EntityState> = entities
        .keys()
        .map(|id| (id.clone(), EntityState::Pending))
        .collect();

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(entities.len());

    for (entity_id, series) in entities {
        // Acquired before spawning so no more than `concurrency` jobs are launched.
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                states.insert(entity_id, EntityState::Failed(FitError::Aborted(e.to_string())));
                continue;
            }
        };

        let span = tracing::info_span!("forecast_entity", entity_id = %entity_id);
        let forecaster = forecaster.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            span.in_scope(|| run_entity(forecaster.as_ref(), &series, &ctx))
        });

        states.insert(entity_id.clone(), EntityState::Fitting);
        tasks.push((entity_id, handle));
    }

    for (entity_id, handle) in tasks {
        let terminal = match handle.await {
            Ok(state) => state,
            Err(e) => EntityState::Failed(FitError::Aborted(e.to_string())),
        };
        states.insert(entity_id, terminal);
    }

    let mut result = BatchResult::default();

    for (entity_id, state) in states {
        match state {
            EntityState::Scored(forecast) => {
                debug!(
                    entity_id = %entity_id,
                    confidence = forecast.confidence,
                    points = forecast.points.len(),
                    "Entity scored"
                );
                result.scored.push(forecast);
            }
            EntityState::Failed(reason) => {
                error!(entity_id = %entity_id, error = %reason, "Entity forecast failed");
                result.failed.push(EntityFailure { entity_id, reason });
            }
            // Every entity is either failed at permit acquisition or spawned,
            // and every spawned task is awaited above.
            EntityState::Pending | EntityState::Fitting => {
                unreachable!("entity {entity_id} merged before reaching a terminal state")
            }
        }
    }

    info!(
        scored = result.scored.len(),
        failed = result.failed.len(),
        "Batch complete"
    );

    result
}
