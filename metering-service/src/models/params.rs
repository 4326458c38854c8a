//! Query-time parameter objects.

use super::aggregation::{AggregationType, WindowSize};
use super::feature_usage::FeatureUsage;
use super::filter_group::{matches_property_filters, FilterGroup, PropertyFilters};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameters for a single aggregation over one meter's events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageParams {
    pub tenant_id: String,
    pub environment_id: String,
    #[serde(default)]
    pub external_customer_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    pub event_name: String,
    #[serde(default)]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub meter_id: Option<String>,
    /// Property counted by COUNT_UNIQUE.
    #[serde(default)]
    pub property_name: Option<String>,
    pub aggregation_type: AggregationType,
    /// Reporting granularity; `None` yields a single value.
    #[serde(default)]
    pub window_size: Option<WindowSize>,
    /// Meter sampling interval for MAX-with-bucket.
    #[serde(default)]
    pub bucket_size: Option<WindowSize>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub filters: PropertyFilters,
    #[serde(default)]
    pub multiplier: Option<Decimal>,
    /// Aligns MONTH windows to the anchor's day of month.
    #[serde(default)]
    pub billing_anchor: Option<DateTime<Utc>>,
}

impl UsageParams {
    pub fn new(
        tenant_id: impl Into<String>,
        environment_id: impl Into<String>,
        event_name: impl Into<String>,
        aggregation_type: AggregationType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            environment_id: environment_id.into(),
            external_customer_id: None,
            customer_id: None,
            subscription_id: None,
            event_name: event_name.into(),
            feature_id: None,
            meter_id: None,
            property_name: None,
            aggregation_type,
            window_size: None,
            bucket_size: None,
            start_time,
            end_time,
            filters: PropertyFilters::new(),
            multiplier: None,
            billing_anchor: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tenant_id.trim().is_empty() {
            return Err("tenant_id is required".to_string());
        }
        if self.environment_id.trim().is_empty() {
            return Err("environment_id is required".to_string());
        }
        if self.event_name.trim().is_empty() {
            return Err("event_name is required".to_string());
        }
        if self.end_time < self.start_time {
            return Err(format!(
                "end_time {} is before start_time {}",
                self.end_time, self.start_time
            ));
        }
        if self.aggregation_type == AggregationType::CountUnique
            && self.property_name.as_deref().unwrap_or("").is_empty()
        {
            return Err("property_name is required for COUNT_UNIQUE".to_string());
        }
        if let Some(multiplier) = self.multiplier {
            if multiplier <= Decimal::ZERO {
                return Err("multiplier must be greater than zero".to_string());
            }
        }
        Ok(())
    }
}

/// Usage split across prioritized filter groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageWithFiltersParams {
    pub usage: UsageParams,
    pub filter_groups: Vec<FilterGroup>,
}

/// One dimension of analytics grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupBy {
    FeatureId,
    Source,
    Property(String),
}

impl GroupBy {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "feature_id" => Ok(GroupBy::FeatureId),
            "source" => Ok(GroupBy::Source),
            other => match other.strip_prefix("properties.") {
                Some(name) if !name.is_empty() => Ok(GroupBy::Property(name.to_string())),
                _ => Err(format!(
                    "invalid group_by value {:?}: valid values are 'feature_id', 'source', or 'properties.<field_name>'",
                    other
                )),
            },
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::FeatureId => write!(f, "feature_id"),
            GroupBy::Source => write!(f, "source"),
            GroupBy::Property(name) => write!(f, "properties.{}", name),
        }
    }
}

/// Parameters for `get_detailed_usage_analytics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageAnalyticsParams {
    pub tenant_id: String,
    pub environment_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub external_customer_id: Option<String>,
    /// Empty means every feature.
    #[serde(default)]
    pub feature_ids: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// `feature_id`, `source` or `properties.<name>`.
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub window_size: Option<WindowSize>,
    #[serde(default)]
    pub property_filters: PropertyFilters,
    #[serde(default)]
    pub billing_anchor: Option<DateTime<Utc>>,
}

/// Meter configuration for a feature aggregated as MAX-with-bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxBucketFeatureInfo {
    pub feature_id: String,
    pub meter_id: String,
    pub event_name: String,
    pub bucket_size: WindowSize,
}

/// Filter parameters for listing processed (version-collapsed) usage rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListProcessedEventsFilter {
    pub tenant_id: String,
    pub environment_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub meter_id: Option<String>,
    #[serde(default)]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub price_id: Option<String>,
    #[serde(default)]
    pub offset: usize,
    /// Zero returns every row after `offset`.
    #[serde(default)]
    pub limit: usize,
}

impl ListProcessedEventsFilter {
    pub fn scope(&self) -> UsageScope {
        UsageScope {
            tenant_id: self.tenant_id.clone(),
            environment_id: self.environment_id.clone(),
            customer_id: non_empty(&self.customer_id),
            subscription_id: non_empty(&self.subscription_id),
            meter_id: non_empty(&self.meter_id),
            price_id: non_empty(&self.price_id),
            feature_ids: non_empty(&self.feature_id).into_iter().collect(),
            start_time: Some(self.start_time),
            end_time: Some(self.end_time),
            ..Default::default()
        }
    }
}

/// Rows a query reads.
///
/// Identity fields (tenant, environment, event, customers, subscription,
/// meter) select the facts a query can see; they never change between
/// versions of one fact. The remaining filters apply to the latest version
/// only, see `identity`.
#[derive(Debug, Clone, Default)]
pub struct UsageScope {
    pub tenant_id: String,
    pub environment_id: String,
    pub event_name: Option<String>,
    pub customer_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub meter_id: Option<String>,
    pub price_id: Option<String>,
    /// Empty means any feature.
    pub feature_ids: Vec<String>,
    pub exclude_feature_ids: Vec<String>,
    /// Empty means any source.
    pub sources: Vec<String>,
    pub property_filters: PropertyFilters,
    /// Inclusive.
    pub start_time: Option<DateTime<Utc>>,
    /// Exclusive.
    pub end_time: Option<DateTime<Utc>>,
}

impl UsageScope {
    pub fn from_usage_params(params: &UsageParams) -> Self {
        Self {
            tenant_id: params.tenant_id.clone(),
            environment_id: params.environment_id.clone(),
            event_name: Some(params.event_name.clone()),
            customer_id: non_empty(&params.customer_id),
            external_customer_id: non_empty(&params.external_customer_id),
            subscription_id: non_empty(&params.subscription_id),
            meter_id: non_empty(&params.meter_id),
            price_id: None,
            feature_ids: params.feature_id.iter().cloned().collect(),
            exclude_feature_ids: Vec::new(),
            sources: Vec::new(),
            property_filters: params.filters.clone(),
            start_time: Some(params.start_time),
            end_time: Some(params.end_time),
        }
    }

    /// The scope without the filters a newer version can move a fact in
    /// or out of: time range, features, price, sources and properties.
    /// Stores are scanned with this scope and `matches` is applied after
    /// version collapse.
    pub fn identity(&self) -> UsageScope {
        UsageScope {
            tenant_id: self.tenant_id.clone(),
            environment_id: self.environment_id.clone(),
            event_name: self.event_name.clone(),
            customer_id: self.customer_id.clone(),
            external_customer_id: self.external_customer_id.clone(),
            subscription_id: self.subscription_id.clone(),
            meter_id: self.meter_id.clone(),
            ..Default::default()
        }
    }

    pub fn matches(&self, row: &FeatureUsage) -> bool {
        if row.tenant_id != self.tenant_id || row.environment_id != self.environment_id {
            return false;
        }
        if let Some(start) = self.start_time {
            if row.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if row.timestamp >= end {
                return false;
            }
        }
        if !field_matches(&self.event_name, &row.event_name)
            || !field_matches(&self.customer_id, &row.customer_id)
            || !field_matches(&self.external_customer_id, &row.external_customer_id)
            || !field_matches(&self.subscription_id, &row.subscription_id)
            || !field_matches(&self.meter_id, &row.meter_id)
            || !field_matches(&self.price_id, &row.price_id)
        {
            return false;
        }
        if !self.feature_ids.is_empty() && !self.feature_ids.contains(&row.feature_id) {
            return false;
        }
        if self.exclude_feature_ids.contains(&row.feature_id) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.contains(&row.source) {
            return false;
        }
        matches_property_filters(&self.property_filters, &row.properties)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn field_matches(expected: &Option<String>, actual: &str) -> bool {
    match expected {
        Some(value) => value == actual,
        None => true,
    }
}
