//! Test helper module for metering-service integration tests.
//!
//! Provides an engine over a fresh in-memory store and fixture builders.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use metering_service::models::{Attribution, Event, FeatureUsage, Properties};
use metering_service::services::{init_metrics, InMemoryFeatureUsageStore, MeteringEngine};
use rust_decimal::Decimal;
use std::sync::{Arc, Once};

// Test constants for tenant context
pub const TEST_TENANT_ID: &str = "11111111-1111-1111-1111-111111111111";
pub const TEST_ENVIRONMENT_ID: &str = "env_test";
pub const TEST_CUSTOMER_ID: &str = "22222222-2222-2222-2222-222222222222";
pub const TEST_EXTERNAL_CUSTOMER_ID: &str = "cus_ext_1";
pub const TEST_SUBSCRIPTION_ID: &str = "sub_1";

static TRACING: Once = Once::new();

pub fn init_test_tracing() {
    TRACING.call_once(|| {
        dotenvy::dotenv().ok();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Start of the day most fixtures are placed in.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

/// Engine wrapper for integration tests.
pub struct TestEngine {
    pub engine: MeteringEngine,
    pub store: Arc<InMemoryFeatureUsageStore>,
}

impl TestEngine {
    pub fn spawn() -> Self {
        Self::with_batch_size(100)
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        init_test_tracing();
        init_metrics();
        let store = Arc::new(InMemoryFeatureUsageStore::new());
        let engine = MeteringEngine::new(store.clone(), batch_size);
        Self { engine, store }
    }

    pub async fn insert(&self, rows: Vec<FeatureUsage>) {
        self.engine
            .bulk_insert_feature_usage(rows)
            .await
            .expect("Failed to insert fixtures");
    }
}

/// Builder for `FeatureUsage` fixtures.
pub struct UsageBuilder {
    row: FeatureUsage,
}

impl UsageBuilder {
    pub fn new(unique_hash: &str, qty: i64) -> Self {
        let event = Event::new(
            TEST_TENANT_ID,
            TEST_ENVIRONMENT_ID,
            TEST_EXTERNAL_CUSTOMER_ID,
            "api_call",
        )
        .with_timestamp(base_time());
        let attribution = Attribution {
            subscription_id: TEST_SUBSCRIPTION_ID.to_string(),
            sub_line_item_id: "li_api".to_string(),
            price_id: "price_api".to_string(),
            meter_id: "meter_api".to_string(),
            feature_id: "feat_api".to_string(),
            period_id: 202403,
        };
        let mut row = FeatureUsage::from_event(&event, &attribution, None, unique_hash.to_string());
        row.customer_id = TEST_CUSTOMER_ID.to_string();
        row.qty_total = Decimal::from(qty);
        Self { row }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.row.id = id.to_string();
        self
    }

    pub fn minutes(mut self, minutes: i64) -> Self {
        self.row.timestamp = at(minutes);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.row.timestamp = timestamp;
        self
    }

    pub fn event_name(mut self, event_name: &str) -> Self {
        self.row.event_name = event_name.to_string();
        self
    }

    pub fn feature(mut self, feature_id: &str, meter_id: &str) -> Self {
        self.row.feature_id = feature_id.to_string();
        self.row.meter_id = meter_id.to_string();
        self
    }

    pub fn line_item(mut self, sub_line_item_id: &str) -> Self {
        self.row.sub_line_item_id = sub_line_item_id.to_string();
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.row.source = source.to_string();
        self
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.row.properties.insert(key, value);
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.row.properties = properties;
        self
    }

    pub fn version(mut self, version: u64, sign: i8) -> Self {
        self.row.version = version;
        self.row.sign = sign;
        self
    }

    pub fn build(self) -> FeatureUsage {
        self.row
    }
}

pub fn usage(unique_hash: &str, qty: i64) -> FeatureUsage {
    UsageBuilder::new(unique_hash, qty).build()
}
