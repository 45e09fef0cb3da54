use std::collections::BTreeMap;
use tracing::debug;

use crate::history::Observation;
use crate::series::{AGGREGATE_ENTITY, Series};

/// Aggregated training data: the cross-entity total plus one series per entity.
#[derive(Debug, Clone)]
pub struct Aggregated {
    /// Sum of all entities per period, labelled [`AGGREGATE_ENTITY`].
    pub total: Series,
    /// Per-entity series keyed (and therefore iterated) by entity id.
    pub entities: BTreeMap<String, Series>,
}

/// Collapses cleaned observations into the aggregate and per-entity series.
///
/// Duplicate `(entity, period)` rows are summed, never deduplicated.
pub fn aggregate(observations: &[Observation]) -> Aggregated {
    let mut total: BTreeMap<_, f64> = BTreeMap::new();
    let mut per_entity: BTreeMap<String, BTreeMap<_, f64>> = BTreeMap::new();

    for o in observations {
        *total.entry(o.period_start).or_default() += o.count;
        *per_entity
            .entry(o.entity_id.clone())
            .or_default()
            .entry(o.period_start)
            .or_default() += o.count;
    }

    let entities: BTreeMap<String, Series> = per_entity
        .into_iter()
        .map(|(id, points)| {
            let series = Series::from_map(id.clone(), points);
            (id, series)
        })
        .collect();

    debug!(
        periods = total.len(),
        entities = entities.len(),
        "Aggregated history"
    );

    Aggregated {
        total: Series::from_map(AGGREGATE_ENTITY, total),
        entities,
    }
}
