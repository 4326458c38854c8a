//! Aggregation strategies.
//!
//! Every strategy runs over rows that `dedup::collapse_latest` has already
//! reduced to one row per logical fact. Strategies are stateless apart from
//! the parameters they need and are built per call.

use crate::models::{AggregationType, FeatureUsage, UsageParams, UsageResult, WindowSize};
use crate::services::error::UsageError;
use crate::services::window::bucket_start;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregator {
    /// Facts whose latest version is positive.
    Count,
    Sum,
    /// `Sum / Count`, zero when nothing counts.
    Avg,
    /// Per-row maximum, without bucket semantics.
    Max,
    CountUnique { property: String },
    /// Signed quantity of the most recent fact.
    Latest,
    SumWithMultiplier { multiplier: Decimal },
    /// Each value weighted by the share of the period left after it.
    WeightedSum {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Aggregator {
    pub fn for_params(params: &UsageParams) -> Result<Self, UsageError> {
        let aggregator = match params.aggregation_type {
            AggregationType::Count => Aggregator::Count,
            AggregationType::Sum => Aggregator::Sum,
            AggregationType::Avg => Aggregator::Avg,
            AggregationType::Max => Aggregator::Max,
            AggregationType::Latest => Aggregator::Latest,
            AggregationType::CountUnique => {
                let property = params
                    .property_name
                    .clone()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        UsageError::UnsupportedAggregation(
                            "COUNT_UNIQUE requires a property_name".to_string(),
                        )
                    })?;
                Aggregator::CountUnique { property }
            }
            AggregationType::SumWithMultiplier => Aggregator::SumWithMultiplier {
                multiplier: params.multiplier.unwrap_or(Decimal::ONE),
            },
            AggregationType::WeightedSum => Aggregator::WeightedSum {
                start: params.start_time,
                end: params.end_time,
            },
        };
        Ok(aggregator)
    }

    pub fn aggregation_type(&self) -> AggregationType {
        match self {
            Aggregator::Count => AggregationType::Count,
            Aggregator::Sum => AggregationType::Sum,
            Aggregator::Avg => AggregationType::Avg,
            Aggregator::Max => AggregationType::Max,
            Aggregator::CountUnique { .. } => AggregationType::CountUnique,
            Aggregator::Latest => AggregationType::Latest,
            Aggregator::SumWithMultiplier { .. } => AggregationType::SumWithMultiplier,
            Aggregator::WeightedSum { .. } => AggregationType::WeightedSum,
        }
    }

    /// Reduce collapsed rows to one value. An empty input yields zero.
    pub fn compute<'a, I>(&self, rows: I) -> Decimal
    where
        I: IntoIterator<Item = &'a FeatureUsage>,
    {
        let rows = rows.into_iter();
        match self {
            Aggregator::Count => Decimal::from(count_positive(rows)),
            Aggregator::Sum => rows.map(FeatureUsage::signed_qty).sum(),
            Aggregator::Avg => {
                let (sum, count) = rows.fold((Decimal::ZERO, 0u64), |(sum, count), row| {
                    let counted = if row.sign > 0 { 1 } else { 0 };
                    (sum + row.signed_qty(), count + counted)
                });
                if count == 0 {
                    Decimal::ZERO
                } else {
                    sum / Decimal::from(count)
                }
            }
            Aggregator::Max => rows
                .map(FeatureUsage::signed_qty)
                .max()
                .unwrap_or(Decimal::ZERO),
            Aggregator::CountUnique { property } => {
                let distinct: BTreeSet<String> = rows
                    .filter(|row| row.sign > 0)
                    .filter_map(|row| row.properties.get_string(property))
                    .collect();
                Decimal::from(distinct.len() as u64)
            }
            Aggregator::Latest => rows
                .max_by_key(|row| row.timestamp)
                .map(FeatureUsage::signed_qty)
                .unwrap_or(Decimal::ZERO),
            Aggregator::SumWithMultiplier { multiplier } => {
                rows.map(FeatureUsage::signed_qty).sum::<Decimal>() * *multiplier
            }
            Aggregator::WeightedSum { start, end } => {
                let period = (*end - *start).num_seconds();
                if period <= 0 {
                    return Decimal::ZERO;
                }
                let period = Decimal::from(period);
                rows.map(|row| {
                    let remaining = (*end - row.timestamp).num_seconds().max(0);
                    row.signed_qty() * Decimal::from(remaining) / period
                })
                .sum()
            }
        }
    }

    /// One value per window, ordered by window start. Windows without rows
    /// are omitted.
    pub fn compute_windowed(
        &self,
        rows: &[FeatureUsage],
        window_size: WindowSize,
        billing_anchor: Option<DateTime<Utc>>,
    ) -> Vec<UsageResult> {
        let mut windows: BTreeMap<DateTime<Utc>, Vec<&FeatureUsage>> = BTreeMap::new();
        for row in rows {
            windows
                .entry(bucket_start(row.timestamp, window_size, billing_anchor))
                .or_default()
                .push(row);
        }

        windows
            .into_iter()
            .map(|(window_start, members)| UsageResult {
                window_start,
                value: self.compute(members),
            })
            .collect()
    }
}

fn count_positive<'a>(rows: impl Iterator<Item = &'a FeatureUsage>) -> u64 {
    rows.filter(|row| row.sign > 0).count() as u64
}
