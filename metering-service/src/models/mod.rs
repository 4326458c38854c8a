//! Domain models for metering-service.

mod aggregation;
mod event;
mod feature_usage;
mod filter_group;
mod params;
mod properties;
mod results;

pub use aggregation::{AggregationType, WindowSize};
pub use event::Event;
pub use feature_usage::{Attribution, DedupKey, FeatureUsage};
pub use filter_group::{matches_property_filters, FilterGroup, PropertyFilters};
pub use params::{
    GroupBy, ListProcessedEventsFilter, MaxBucketFeatureInfo, UsageAnalyticsParams, UsageParams,
    UsageScope, UsageWithFiltersParams,
};
pub use properties::{Properties, PropertyValue};
pub use results::{
    AggregationResult, DetailedUsageAnalytic, UsageAnalyticPoint, UsageByFeatureResult,
    UsageResult,
};
