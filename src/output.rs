//! Output assembly and encoding for the forecast table.
//!
//! Only current and future months are emitted; every row of a run carries the
//! same `generated_at`. The table is always written whole, never appended.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::period::month_start;
use crate::runner::EntityForecast;

/// One row of the published forecast table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub period_start: NaiveDate,
    pub entity_id: String,
    pub point_estimate: f64,
    pub confidence_score: f64,
    pub generated_at: DateTime<Utc>,
}

/// Keeps forecast points from the start of `as_of`'s month onwards and tags
/// them with their entity's confidence and the run timestamp.
pub fn assemble(
    forecasts: &[EntityForecast],
    as_of: NaiveDate,
    generated_at: DateTime<Utc>,
) -> Vec<OutputRow> {
    let current = month_start(as_of);

    let rows: Vec<OutputRow> = forecasts
        .iter()
        .flat_map(|f| {
            f.points
                .iter()
                .filter(move |p| p.period_start >= current)
                .map(move |p| OutputRow {
                    period_start: p.period_start,
                    entity_id: f.entity_id.clone(),
                    point_estimate: p.point_estimate.max(0.0),
                    confidence_score: f.confidence,
                    generated_at,
                })
        })
        .collect();

    info!(rows = rows.len(), from = %current, "Assembled forecast rows");
    rows
}

const HEADER: [&str; 5] = [
    "period_start",
    "entity_id",
    "point_estimate",
    "confidence_score",
    "generated_at",
];

/// Encodes rows as CSV. The header is written even when there are no rows.
pub fn to_csv(rows: &[OutputRow]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());

    writer.write_record(HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("finishing CSV buffer: {}", e.error()))?;
    debug!(rows = rows.len(), bytes = bytes.len(), "Encoded forecast CSV");
    Ok(bytes)
}

/// Decodes a forecast table previously produced by [`to_csv`].
pub fn from_csv(bytes: &[u8]) -> Result<Vec<OutputRow>> {
    let mut rdr = csv::Reader::from_reader(bytes);
    let mut rows = Vec::new();

    for result in rdr.deserialize() {
        let row: OutputRow = result?;
        rows.push(row);
    }

    Ok(rows)
}
