//! Aggregation outputs handed to billing and invoicing.

use super::aggregation::AggregationType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One windowed value, ordered by `window_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageResult {
    pub window_start: DateTime<Utc>,
    pub value: Decimal,
}

/// Result of `get_usage` and `get_usage_with_filters`.
///
/// `value` is always the total over the requested range. `results` holds
/// one point per window when a window size was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub event_name: String,
    pub aggregation_type: AggregationType,
    pub value: Decimal,
    #[serde(default)]
    pub results: Vec<UsageResult>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AggregationResult {
    pub fn zero(event_name: impl Into<String>, aggregation_type: AggregationType) -> Self {
        Self {
            event_name: event_name.into(),
            aggregation_type,
            value: Decimal::ZERO,
            results: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A time-series point inside a `DetailedUsageAnalytic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAnalyticPoint {
    pub timestamp: DateTime<Utc>,
    pub usage: Decimal,
    pub max_usage: Decimal,
    pub latest_usage: Decimal,
    pub count_unique_usage: u64,
    pub event_count: u64,
    pub cost: Decimal,
}

/// Per-group analytics row.
///
/// Grouping dimensions that were not requested are left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedUsageAnalytic {
    pub feature_id: String,
    pub event_name: String,
    pub source: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// MAX when the feature is bucketed, SUM otherwise.
    pub aggregation_type: AggregationType,
    pub total_usage: Decimal,
    pub max_usage: Decimal,
    pub latest_usage: Decimal,
    pub count_unique_usage: u64,
    pub event_count: u64,
    /// Filled in by pricing; always zero here.
    pub total_cost: Decimal,
    #[serde(default)]
    pub points: Vec<UsageAnalyticPoint>,
}

/// Pre-aggregated usage for one subscription line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageByFeatureResult {
    pub sub_line_item_id: String,
    pub feature_id: String,
    pub meter_id: String,
    pub sum_total: Decimal,
    pub max_total: Decimal,
    pub count_distinct_ids: u64,
    pub count_unique_qty: u64,
    pub latest_qty: Decimal,
}
