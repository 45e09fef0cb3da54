use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Synthetic entity id of the cross-entity aggregate series.
pub const AGGREGATE_ENTITY: &str = "all";

/// Monthly values for one entity, ascending by period with no duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub entity_id: String,
    pub periods: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl Series {
    /// Builds a series from a period-keyed map; the map's ordering guarantees
    /// ascending, duplicate-free periods.
    pub fn from_map(entity_id: impl Into<String>, points: BTreeMap<NaiveDate, f64>) -> Self {
        let (periods, values) = points.into_iter().unzip();
        Self {
            entity_id: entity_id.into(),
            periods,
            values,
        }
    }

    /// Builds a series from parallel vectors, sorting by period and summing
    /// any duplicated period.
    pub fn from_points(
        entity_id: impl Into<String>,
        points: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> Self {
        let mut map = BTreeMap::new();
        for (period, value) in points {
            *map.entry(period).or_insert(0.0) += value;
        }
        Self::from_map(entity_id, map)
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn last_period(&self) -> Option<NaiveDate> {
        self.periods.last().copied()
    }

    /// The first `n` periods of the series.
    pub fn head(&self, n: usize) -> Series {
        let n = n.min(self.len());
        Series {
            entity_id: self.entity_id.clone(),
            periods: self.periods[..n].to_vec(),
            values: self.values[..n].to_vec(),
        }
    }
}
