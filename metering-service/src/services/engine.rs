//! Usage query entry points.

use crate::models::{
    AggregationResult, AggregationType, DedupKey, FeatureUsage, ListProcessedEventsFilter,
    UsageByFeatureResult, UsageParams, UsageResult, UsageScope, UsageWithFiltersParams,
};
use crate::services::aggregators::Aggregator;
use crate::services::bucket::{BucketReduction, GroupKey};
use crate::services::dedup::collapse_latest;
use crate::services::error::UsageError;
use crate::services::metrics::{record_aggregation, record_error, QUERY_DURATION};
use crate::services::pipeline::FilterGroupPipeline;
use crate::services::store::FeatureUsageStore;
use crate::services::writer::BatchWriter;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const DEFAULT_LOOKBACK_HOURS: i64 = 6;

/// Aggregation engine over an append-only usage store.
///
/// Reads never mutate the store and every read collapses versions first,
/// so queries are safe to run concurrently with each other and with writes.
#[derive(Clone)]
pub struct MeteringEngine {
    store: Arc<dyn FeatureUsageStore>,
    writer: BatchWriter,
    default_lookback: Duration,
}

impl MeteringEngine {
    pub fn new(store: Arc<dyn FeatureUsageStore>, batch_size: usize) -> Self {
        let writer = BatchWriter::new(store.clone(), batch_size);
        Self {
            store,
            writer,
            default_lookback: Duration::hours(DEFAULT_LOOKBACK_HOURS),
        }
    }

    /// Range used by analytics when the caller gives no start time.
    pub fn with_default_lookback(mut self, lookback: Duration) -> Self {
        self.default_lookback = lookback;
        self
    }

    pub fn default_lookback(&self) -> Duration {
        self.default_lookback
    }

    pub fn store(&self) -> &Arc<dyn FeatureUsageStore> {
        &self.store
    }

    pub async fn insert_feature_usage(&self, row: FeatureUsage) -> Result<(), UsageError> {
        self.writer
            .insert_feature_usage(row)
            .await
            .inspect_err(|e| record_error("insert_feature_usage", e.kind()))
    }

    pub async fn bulk_insert_feature_usage(
        &self,
        rows: Vec<FeatureUsage>,
    ) -> Result<usize, UsageError> {
        self.writer
            .bulk_insert_feature_usage(rows)
            .await
            .inspect_err(|e| record_error("bulk_insert_feature_usage", e.kind()))
    }

    /// Whether any version of this logical fact is already stored.
    #[instrument(skip(self, key), fields(subscription_id = %key.subscription_id, meter_id = %key.meter_id))]
    pub async fn is_duplicate(&self, key: &DedupKey) -> Result<bool, UsageError> {
        self.store.contains(key).await.map_err(|e| match e {
            UsageError::Store { source, .. } => UsageError::store(
                "is_duplicate",
                format!("meter={} period={}", key.meter_id, key.period_id),
                source,
            ),
            other => other,
        })
    }

    /// Aggregate one meter's usage over `[start_time, end_time)`.
    #[instrument(
        skip(self, params),
        fields(
            tenant_id = %params.tenant_id,
            event_name = %params.event_name,
            aggregation_type = %params.aggregation_type
        )
    )]
    pub async fn get_usage(&self, params: &UsageParams) -> Result<AggregationResult, UsageError> {
        let result = self.get_usage_inner(params).await;
        if let Err(e) = &result {
            record_error("get_usage", e.kind());
        }
        result
    }

    async fn get_usage_inner(&self, params: &UsageParams) -> Result<AggregationResult, UsageError> {
        params.validate().map_err(UsageError::Validation)?;
        let aggregator = Aggregator::for_params(params)?;

        let facts = self
            .collapsed(&UsageScope::from_usage_params(params), "get_usage")
            .await?;
        debug!(facts = facts.len(), "Collapsed usage facts");

        Ok(self.aggregate(&aggregator, params, &facts))
    }

    /// Aggregate usage per filter group; each row counts for its best group only.
    ///
    /// Returns one result per group that won at least one row, ordered by
    /// group id.
    #[instrument(
        skip(self, params),
        fields(
            tenant_id = %params.usage.tenant_id,
            event_name = %params.usage.event_name,
            filter_groups = params.filter_groups.len()
        )
    )]
    pub async fn get_usage_with_filters(
        &self,
        params: &UsageWithFiltersParams,
    ) -> Result<Vec<AggregationResult>, UsageError> {
        let result = self.get_usage_with_filters_inner(params).await;
        if let Err(e) = &result {
            record_error("get_usage_with_filters", e.kind());
        }
        result
    }

    async fn get_usage_with_filters_inner(
        &self,
        params: &UsageWithFiltersParams,
    ) -> Result<Vec<AggregationResult>, UsageError> {
        let usage = &params.usage;
        usage.validate().map_err(UsageError::Validation)?;
        if params.filter_groups.iter().any(|g| g.id.trim().is_empty()) {
            return Err(UsageError::Validation(
                "filter group id is required".to_string(),
            ));
        }
        let aggregator = Aggregator::for_params(usage)?;

        let scope = UsageScope::from_usage_params(usage);
        let rows = self.scan(&scope.identity(), "get_usage_with_filters").await?;
        let pipeline = FilterGroupPipeline::builder(scope)
            .groups(params.filter_groups.iter().cloned())
            .build();

        let results = pipeline
            .run(rows)
            .into_iter()
            .map(|(group_id, facts)| {
                self.aggregate(&aggregator, usage, &facts)
                    .with_metadata("filter_group_id", group_id.clone())
                    .with_metadata("price_id", group_id)
            })
            .collect();
        Ok(results)
    }

    /// One pre-aggregated pass per line item of a subscription.
    #[instrument(skip(self), fields(subscription_id = %subscription_id, tenant_id = %tenant_id))]
    pub async fn get_feature_usage_by_subscription(
        &self,
        subscription_id: &str,
        external_customer_id: &str,
        environment_id: &str,
        tenant_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<BTreeMap<String, UsageByFeatureResult>, UsageError> {
        if subscription_id.is_empty() || tenant_id.is_empty() || environment_id.is_empty() {
            let err = UsageError::Validation(
                "subscription_id, tenant_id and environment_id are required".to_string(),
            );
            record_error("get_feature_usage_by_subscription", err.kind());
            return Err(err);
        }

        let scope = UsageScope {
            tenant_id: tenant_id.to_string(),
            environment_id: environment_id.to_string(),
            subscription_id: Some(subscription_id.to_string()),
            external_customer_id: Some(external_customer_id.to_string())
                .filter(|id| !id.is_empty()),
            start_time: Some(start_time),
            end_time: Some(end_time),
            ..Default::default()
        };
        let facts = self
            .collapsed(&scope, "get_feature_usage_by_subscription")
            .await?;

        let mut by_line_item: BTreeMap<String, LineItemAccumulator> = BTreeMap::new();
        for row in &facts {
            by_line_item
                .entry(row.sub_line_item_id.clone())
                .or_insert_with(|| LineItemAccumulator::new(row))
                .absorb(row);
        }

        debug!(line_items = by_line_item.len(), "Subscription usage aggregated");
        Ok(by_line_item
            .into_iter()
            .map(|(id, acc)| (id.clone(), acc.finish(id)))
            .collect())
    }

    /// Page through processed rows, one per logical fact, ordered by
    /// timestamp then id. Returns the page and the total number of matching
    /// facts.
    #[instrument(
        skip(self, filter),
        fields(tenant_id = %filter.tenant_id, offset = filter.offset, limit = filter.limit)
    )]
    pub async fn get_processed_events(
        &self,
        filter: &ListProcessedEventsFilter,
    ) -> Result<(Vec<FeatureUsage>, u64), UsageError> {
        if filter.tenant_id.trim().is_empty() || filter.environment_id.trim().is_empty() {
            let err = UsageError::Validation(
                "tenant_id and environment_id are required".to_string(),
            );
            record_error("get_processed_events", err.kind());
            return Err(err);
        }
        if filter.end_time < filter.start_time {
            let err = UsageError::Validation(format!(
                "end_time {} is before start_time {}",
                filter.end_time, filter.start_time
            ));
            record_error("get_processed_events", err.kind());
            return Err(err);
        }

        let mut facts = self
            .collapsed(&filter.scope(), "get_processed_events")
            .await
            .inspect_err(|e| record_error("get_processed_events", e.kind()))?;
        facts.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));

        let total = facts.len() as u64;
        let page = facts.into_iter().skip(filter.offset);
        let page: Vec<FeatureUsage> = if filter.limit > 0 {
            page.take(filter.limit).collect()
        } else {
            page.collect()
        };

        debug!(total, returned = page.len(), "Listed processed events");
        Ok((page, total))
    }

    /// Latest version of every fact visible to the scope's identity,
    /// filtered by the whole scope.
    pub(crate) async fn collapsed(
        &self,
        scope: &UsageScope,
        operation: &'static str,
    ) -> Result<Vec<FeatureUsage>, UsageError> {
        let rows = self.scan(&scope.identity(), operation).await?;
        Ok(collapse_latest(rows)
            .into_iter()
            .filter(|row| scope.matches(row))
            .collect())
    }

    async fn scan(
        &self,
        scope: &UsageScope,
        operation: &'static str,
    ) -> Result<Vec<FeatureUsage>, UsageError> {
        let timer = QUERY_DURATION.with_label_values(&[operation]).start_timer();
        let rows = self.store.scan(scope).await.map_err(|e| match e {
            UsageError::Store { source, .. } => UsageError::store(
                operation,
                format!("tenant={} env={}", scope.tenant_id, scope.environment_id),
                source,
            ),
            other => other,
        })?;
        timer.observe_duration();
        Ok(rows)
    }

    /// Run the aggregator, or the bucket engine for MAX with a bucket size.
    fn aggregate(
        &self,
        aggregator: &Aggregator,
        params: &UsageParams,
        facts: &[FeatureUsage],
    ) -> AggregationResult {
        let aggregation_type = aggregator.aggregation_type();
        record_aggregation(aggregation_type.as_str());
        let mut result = AggregationResult::zero(params.event_name.clone(), aggregation_type);

        if let (AggregationType::Max, Some(bucket_size)) = (aggregation_type, params.bucket_size) {
            let reduction = BucketReduction::reduce(facts, bucket_size, params.billing_anchor, &[]);
            let key = GroupKey::default();
            result.value = reduction.totals(&key).total;
            result.results = match params.window_size {
                Some(window_size) => reduction
                    .series(&key, window_size, params.billing_anchor)
                    .into_iter()
                    .map(|(window_start, totals)| UsageResult {
                        window_start,
                        value: totals.total,
                    })
                    .collect(),
                None => reduction
                    .buckets(&key)
                    .map(|cell| UsageResult {
                        window_start: cell.bucket_start,
                        value: cell.max,
                    })
                    .collect(),
            };
            return result;
        }

        result.value = aggregator.compute(facts);
        if let Some(window_size) = params.window_size {
            result.results = aggregator.compute_windowed(facts, window_size, params.billing_anchor);
        }
        result
    }
}

struct LineItemAccumulator {
    feature_id: String,
    meter_id: String,
    sum_total: Decimal,
    max_total: Option<Decimal>,
    ids: BTreeSet<String>,
    unique_hashes: BTreeSet<String>,
    latest: Option<(DateTime<Utc>, Decimal)>,
}

impl LineItemAccumulator {
    fn new(row: &FeatureUsage) -> Self {
        Self {
            feature_id: row.feature_id.clone(),
            meter_id: row.meter_id.clone(),
            sum_total: Decimal::ZERO,
            max_total: None,
            ids: BTreeSet::new(),
            unique_hashes: BTreeSet::new(),
            latest: None,
        }
    }

    fn absorb(&mut self, row: &FeatureUsage) {
        let qty = row.signed_qty();
        self.sum_total += qty;
        self.max_total = Some(self.max_total.map_or(qty, |m| m.max(qty)));
        self.ids.insert(row.id.clone());
        if row.sign > 0 {
            self.unique_hashes.insert(row.unique_hash.clone());
        }
        match self.latest {
            Some((at, _)) if at > row.timestamp => {}
            _ => self.latest = Some((row.timestamp, qty)),
        }
    }

    fn finish(self, sub_line_item_id: String) -> UsageByFeatureResult {
        UsageByFeatureResult {
            sub_line_item_id,
            feature_id: self.feature_id,
            meter_id: self.meter_id,
            sum_total: self.sum_total,
            max_total: self.max_total.unwrap_or(Decimal::ZERO),
            count_distinct_ids: self.ids.len() as u64,
            count_unique_qty: self.unique_hashes.len() as u64,
            latest_qty: self.latest.map(|(_, qty)| qty).unwrap_or(Decimal::ZERO),
        }
    }
}
