//! MAX-with-bucket aggregation.
//!
//! Gauge-like meters are reduced in two phases. Phase one keeps one peak
//! per (group key, bucket), where buckets are sized by the meter. Phase two
//! sums those peaks, either over the whole range or per reporting window.

use crate::models::{FeatureUsage, GroupBy, WindowSize};
use crate::services::window::bucket_start;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Values of the requested grouping dimensions for one row.
///
/// Dimensions that were not requested stay `None`/absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub feature_id: Option<String>,
    pub source: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl GroupKey {
    /// Missing properties group under the empty string.
    pub fn for_row(row: &FeatureUsage, group_by: &[GroupBy]) -> Self {
        let mut key = GroupKey::default();
        for dimension in group_by {
            match dimension {
                GroupBy::FeatureId => key.feature_id = Some(row.feature_id.clone()),
                GroupBy::Source => key.source = Some(row.source.clone()),
                GroupBy::Property(name) => {
                    let value = row.properties.get_string(name).unwrap_or_default();
                    key.properties.insert(name.clone(), value);
                }
            }
        }
        key
    }
}

/// Phase one state for one (group key, bucket) cell.
#[derive(Debug, Clone)]
pub struct BucketCell {
    pub bucket_start: DateTime<Utc>,
    pub max: Decimal,
    pub latest: Decimal,
    latest_at: DateTime<Utc>,
    unique_hashes: BTreeSet<String>,
    ids: BTreeSet<String>,
}

impl BucketCell {
    fn new(bucket_start: DateTime<Utc>, row: &FeatureUsage) -> Self {
        let mut cell = Self {
            bucket_start,
            max: row.signed_qty(),
            latest: row.signed_qty(),
            latest_at: row.timestamp,
            unique_hashes: BTreeSet::new(),
            ids: BTreeSet::new(),
        };
        cell.track(row);
        cell
    }

    fn absorb(&mut self, row: &FeatureUsage) {
        let qty = row.signed_qty();
        if qty > self.max {
            self.max = qty;
        }
        if row.timestamp >= self.latest_at {
            self.latest = qty;
            self.latest_at = row.timestamp;
        }
        self.track(row);
    }

    fn track(&mut self, row: &FeatureUsage) {
        if row.sign > 0 {
            self.unique_hashes.insert(row.unique_hash.clone());
        }
        self.ids.insert(row.id.clone());
    }

    pub fn count_unique(&self) -> u64 {
        self.unique_hashes.len() as u64
    }

    pub fn event_count(&self) -> u64 {
        self.ids.len() as u64
    }
}

/// Figures reported for a group or a reporting window.
///
/// For bucketed meters `total` is the sum of bucket peaks, `max` the
/// highest peak and `latest` the latest value of the last bucket.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UsageTotals {
    pub total: Decimal,
    pub max: Decimal,
    pub latest: Decimal,
    pub count_unique: u64,
    pub event_count: u64,
}

impl UsageTotals {
    fn from_cells<'a>(cells: impl Iterator<Item = &'a BucketCell>) -> Self {
        let mut totals = UsageTotals::default();
        let mut first = true;
        for cell in cells {
            totals.total += cell.max;
            totals.max = if first { cell.max } else { totals.max.max(cell.max) };
            totals.latest = cell.latest;
            totals.count_unique += cell.count_unique();
            totals.event_count += cell.event_count();
            first = false;
        }
        totals
    }
}

/// Phase one output: bucket cells per group key, ordered by bucket start.
#[derive(Debug, Clone, Default)]
pub struct BucketReduction {
    cells: BTreeMap<GroupKey, BTreeMap<DateTime<Utc>, BucketCell>>,
}

impl BucketReduction {
    /// Reduce collapsed rows to one cell per (group key, bucket).
    pub fn reduce(
        rows: &[FeatureUsage],
        bucket_size: WindowSize,
        billing_anchor: Option<DateTime<Utc>>,
        group_by: &[GroupBy],
    ) -> Self {
        let mut cells: BTreeMap<GroupKey, BTreeMap<DateTime<Utc>, BucketCell>> = BTreeMap::new();
        for row in rows {
            let start = bucket_start(row.timestamp, bucket_size, billing_anchor);
            let buckets = cells.entry(GroupKey::for_row(row, group_by)).or_default();
            match buckets.get_mut(&start) {
                Some(cell) => cell.absorb(row),
                None => {
                    buckets.insert(start, BucketCell::new(start, row));
                }
            }
        }
        Self { cells }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &GroupKey> {
        self.cells.keys()
    }

    /// Phase one cells of one group, ordered by bucket start.
    pub fn buckets(&self, key: &GroupKey) -> impl Iterator<Item = &BucketCell> {
        self.cells.get(key).into_iter().flat_map(|b| b.values())
    }

    /// Sum-of-peaks totals for one group.
    pub fn totals(&self, key: &GroupKey) -> UsageTotals {
        UsageTotals::from_cells(self.buckets(key))
    }

    /// Re-bucket one group's peaks by the reporting window.
    pub fn series(
        &self,
        key: &GroupKey,
        window_size: WindowSize,
        billing_anchor: Option<DateTime<Utc>>,
    ) -> Vec<(DateTime<Utc>, UsageTotals)> {
        let mut windows: BTreeMap<DateTime<Utc>, Vec<&BucketCell>> = BTreeMap::new();
        for cell in self.buckets(key) {
            windows
                .entry(bucket_start(cell.bucket_start, window_size, billing_anchor))
                .or_default()
                .push(cell);
        }
        windows
            .into_iter()
            .map(|(start, cells)| (start, UsageTotals::from_cells(cells.into_iter())))
            .collect()
    }
}
