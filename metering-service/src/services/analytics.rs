//! Detailed usage analytics.
//!
//! Requested features are split in two partitions. Features whose meter
//! has a bucket size go through the bucket engine one feature at a time;
//! every other feature is aggregated in a single pass that computes all
//! figures per group at once. Results are concatenated, standard first.

use crate::models::{
    AggregationType, DetailedUsageAnalytic, FeatureUsage, GroupBy, MaxBucketFeatureInfo,
    UsageAnalyticPoint, UsageAnalyticsParams, UsageScope, WindowSize,
};
use crate::services::bucket::{BucketReduction, GroupKey, UsageTotals};
use crate::services::engine::MeteringEngine;
use crate::services::error::UsageError;
use crate::services::metrics::{record_aggregation, record_error};
use crate::services::window::bucket_start;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

/// Parse grouping dimensions, defaulting to `feature_id`.
///
/// Fails on the first value that is not `feature_id`, `source` or
/// `properties.<name>`.
pub fn parse_group_by(values: &[String]) -> Result<Vec<GroupBy>, UsageError> {
    if values.is_empty() {
        return Ok(vec![GroupBy::FeatureId]);
    }
    let mut parsed = Vec::with_capacity(values.len());
    for value in values {
        let dimension = GroupBy::parse(value.trim()).map_err(UsageError::InvalidGroupBy)?;
        if !parsed.contains(&dimension) {
            parsed.push(dimension);
        }
    }
    Ok(parsed)
}

/// Requested features split by processing path.
#[derive(Debug, Default, PartialEq)]
struct FeaturePartition {
    /// Empty with `all_standard` set means every non-bucketed feature.
    standard: Vec<String>,
    all_standard: bool,
    bucketed: Vec<MaxBucketFeatureInfo>,
}

fn partition_features(
    requested: &[String],
    max_bucket_features: &BTreeMap<String, MaxBucketFeatureInfo>,
) -> FeaturePartition {
    if requested.is_empty() {
        return FeaturePartition {
            standard: Vec::new(),
            all_standard: true,
            bucketed: max_bucket_features.values().cloned().collect(),
        };
    }

    let mut partition = FeaturePartition::default();
    let unique: BTreeSet<&String> = requested.iter().collect();
    for feature_id in unique {
        match max_bucket_features.get(feature_id) {
            Some(info) => partition.bucketed.push(info.clone()),
            None => partition.standard.push(feature_id.clone()),
        }
    }
    partition
}

impl MeteringEngine {
    /// Per-group usage analytics with optional time series.
    ///
    /// `max_bucket_features` maps feature id to the meter configuration of
    /// features aggregated as MAX-with-bucket.
    #[instrument(
        skip(self, params, max_bucket_features),
        fields(
            tenant_id = %params.tenant_id,
            customer_id = %params.customer_id,
            features = params.feature_ids.len()
        )
    )]
    pub async fn get_detailed_usage_analytics(
        &self,
        params: &UsageAnalyticsParams,
        max_bucket_features: &BTreeMap<String, MaxBucketFeatureInfo>,
    ) -> Result<Vec<DetailedUsageAnalytic>, UsageError> {
        let result = self.detailed_usage_analytics(params, max_bucket_features).await;
        if let Err(e) = &result {
            record_error("get_detailed_usage_analytics", e.kind());
        }
        result
    }

    async fn detailed_usage_analytics(
        &self,
        params: &UsageAnalyticsParams,
        max_bucket_features: &BTreeMap<String, MaxBucketFeatureInfo>,
    ) -> Result<Vec<DetailedUsageAnalytic>, UsageError> {
        if params.tenant_id.trim().is_empty() || params.environment_id.trim().is_empty() {
            return Err(UsageError::Validation(
                "tenant_id and environment_id are required".to_string(),
            ));
        }
        let group_by = parse_group_by(&params.group_by)?;

        let end = params.end_time.unwrap_or_else(Utc::now);
        let start = match params.start_time {
            Some(start) => start,
            None => end.checked_sub_signed(self.default_lookback()).ok_or_else(|| {
                UsageError::Validation(format!("no default start time before {}", end))
            })?,
        };
        if end < start {
            return Err(UsageError::Validation(format!(
                "end_time {} is before start_time {}",
                end, start
            )));
        }

        let partition = partition_features(&params.feature_ids, max_bucket_features);
        debug!(
            standard = partition.standard.len(),
            all_standard = partition.all_standard,
            bucketed = partition.bucketed.len(),
            "Partitioned analytics features"
        );

        let base = UsageScope {
            tenant_id: params.tenant_id.clone(),
            environment_id: params.environment_id.clone(),
            customer_id: Some(params.customer_id.clone()).filter(|c| !c.is_empty()),
            external_customer_id: params
                .external_customer_id
                .clone()
                .filter(|c| !c.is_empty()),
            sources: params.sources.clone(),
            property_filters: params.property_filters.clone(),
            start_time: Some(start),
            end_time: Some(end),
            ..Default::default()
        };

        let mut analytics = Vec::new();

        if partition.all_standard || !partition.standard.is_empty() {
            let scope = UsageScope {
                feature_ids: partition.standard.clone(),
                exclude_feature_ids: if partition.all_standard {
                    max_bucket_features.keys().cloned().collect()
                } else {
                    Vec::new()
                },
                ..base.clone()
            };
            let facts = self.collapsed(&scope, "analytics_standard").await?;
            analytics.extend(standard_analytics(&facts, &group_by, params));
        }

        for info in &partition.bucketed {
            let scope = UsageScope {
                feature_ids: vec![info.feature_id.clone()],
                meter_id: Some(info.meter_id.clone()).filter(|m| !m.is_empty()),
                event_name: Some(info.event_name.clone()).filter(|e| !e.is_empty()),
                ..base.clone()
            };
            let facts = self.collapsed(&scope, "analytics_max_bucket").await?;
            analytics.extend(bucketed_analytics(&facts, info, &group_by, params));
        }

        info!(rows = analytics.len(), "Detailed usage analytics computed");
        Ok(analytics)
    }
}

fn standard_analytics(
    facts: &[FeatureUsage],
    group_by: &[GroupBy],
    params: &UsageAnalyticsParams,
) -> Vec<DetailedUsageAnalytic> {
    record_aggregation(AggregationType::Sum.as_str());

    let mut groups: BTreeMap<GroupKey, Vec<&FeatureUsage>> = BTreeMap::new();
    for row in facts {
        groups.entry(GroupKey::for_row(row, group_by)).or_default().push(row);
    }

    groups
        .into_iter()
        .map(|(key, rows)| {
            let totals = standard_totals(&rows);
            let points = match params.window_size {
                Some(window_size) => {
                    standard_points(&rows, window_size, params.billing_anchor)
                }
                None => Vec::new(),
            };
            let event_name = rows
                .first()
                .map(|r| r.event_name.clone())
                .unwrap_or_default();
            analytic(key, event_name, AggregationType::Sum, totals, points)
        })
        .collect()
}

fn bucketed_analytics(
    facts: &[FeatureUsage],
    info: &MaxBucketFeatureInfo,
    group_by: &[GroupBy],
    params: &UsageAnalyticsParams,
) -> Vec<DetailedUsageAnalytic> {
    record_aggregation(AggregationType::Max.as_str());

    let reduction = BucketReduction::reduce(facts, info.bucket_size, params.billing_anchor, group_by);
    reduction
        .keys()
        .map(|key| {
            let totals = reduction.totals(key);
            let points = match params.window_size {
                Some(window_size) => reduction
                    .series(key, window_size, params.billing_anchor)
                    .into_iter()
                    .map(|(timestamp, totals)| point(timestamp, &totals))
                    .collect(),
                None => Vec::new(),
            };
            // Each bucketed feature is reduced on its own.
            let mut key = key.clone();
            key.feature_id = Some(info.feature_id.clone());
            analytic(key, info.event_name.clone(), AggregationType::Max, totals, points)
        })
        .collect()
}

fn standard_totals(rows: &[&FeatureUsage]) -> UsageTotals {
    let mut totals = UsageTotals::default();
    let mut max: Option<Decimal> = None;
    let mut latest: Option<(DateTime<Utc>, Decimal)> = None;
    let mut unique_hashes = BTreeSet::new();
    let mut ids = BTreeSet::new();

    for row in rows {
        let qty = row.signed_qty();
        totals.total += qty;
        max = Some(max.map_or(qty, |m| m.max(qty)));
        match latest {
            Some((at, _)) if at > row.timestamp => {}
            _ => latest = Some((row.timestamp, qty)),
        }
        if row.sign > 0 {
            unique_hashes.insert(row.unique_hash.as_str());
        }
        ids.insert(row.id.as_str());
    }

    totals.max = max.unwrap_or(Decimal::ZERO);
    totals.latest = latest.map(|(_, qty)| qty).unwrap_or(Decimal::ZERO);
    totals.count_unique = unique_hashes.len() as u64;
    totals.event_count = ids.len() as u64;
    totals
}

fn standard_points(
    rows: &[&FeatureUsage],
    window_size: WindowSize,
    billing_anchor: Option<DateTime<Utc>>,
) -> Vec<UsageAnalyticPoint> {
    let mut windows: BTreeMap<DateTime<Utc>, Vec<&FeatureUsage>> = BTreeMap::new();
    for row in rows {
        windows
            .entry(bucket_start(row.timestamp, window_size, billing_anchor))
            .or_default()
            .push(*row);
    }
    windows
        .into_iter()
        .map(|(timestamp, members)| point(timestamp, &standard_totals(&members)))
        .collect()
}

fn point(timestamp: DateTime<Utc>, totals: &UsageTotals) -> UsageAnalyticPoint {
    UsageAnalyticPoint {
        timestamp,
        usage: totals.total,
        max_usage: totals.max,
        latest_usage: totals.latest,
        count_unique_usage: totals.count_unique,
        event_count: totals.event_count,
        cost: Decimal::ZERO,
    }
}

fn analytic(
    key: GroupKey,
    event_name: String,
    aggregation_type: AggregationType,
    totals: UsageTotals,
    points: Vec<UsageAnalyticPoint>,
) -> DetailedUsageAnalytic {
    DetailedUsageAnalytic {
        feature_id: key.feature_id.unwrap_or_default(),
        event_name,
        source: key.source.unwrap_or_default(),
        properties: key.properties,
        aggregation_type,
        total_usage: totals.total,
        max_usage: totals.max,
        latest_usage: totals.latest,
        count_unique_usage: totals.count_unique,
        event_count: totals.event_count,
        total_cost: Decimal::ZERO,
        points,
    }
}
