//! Services module for metering-service.

pub mod aggregators;
pub mod analytics;
pub mod bucket;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod window;
pub mod writer;

pub use aggregators::Aggregator;
pub use analytics::parse_group_by;
pub use bucket::{BucketReduction, GroupKey, UsageTotals};
pub use dedup::{collapse_latest, generate_unique_hash};
pub use engine::{MeteringEngine, DEFAULT_LOOKBACK_HOURS};
pub use error::UsageError;
pub use metrics::{
    get_metrics, init_metrics, record_aggregation, record_batch_failure, record_error,
    record_rows_appended,
};
pub use pipeline::FilterGroupPipeline;
pub use store::{FeatureUsageStore, InMemoryFeatureUsageStore};
pub use window::bucket_start;
pub use writer::{BatchWriter, DEFAULT_BATCH_SIZE};
