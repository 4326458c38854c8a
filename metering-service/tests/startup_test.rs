//! Seed replay and report integration tests for metering-service.

mod common;

use chrono::{Duration, Utc};
use common::{init_test_tracing, UsageBuilder, TEST_ENVIRONMENT_ID, TEST_TENANT_ID};
use metering_service::config::{EngineConfig, MeteringConfig, ReportConfig};
use metering_service::models::{AggregationType, MaxBucketFeatureInfo, WindowSize};
use metering_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config;
use std::io::Write;
use std::path::PathBuf;

fn config(seed_path: Option<PathBuf>) -> MeteringConfig {
    MeteringConfig {
        common: Config::default(),
        service_name: "metering-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        engine: EngineConfig::default(),
        seed_path,
        report: ReportConfig {
            tenant_id: TEST_TENANT_ID.to_string(),
            environment_id: TEST_ENVIRONMENT_ID.to_string(),
            customer_id: String::new(),
            window_size: None,
            group_by: Vec::new(),
            lookback_hours: Some(24),
        },
    }
}

fn write_seed() -> tempfile::NamedTempFile {
    let recent = Utc::now() - Duration::hours(2);
    let rows = vec![
        UsageBuilder::new("a", 3).timestamp(recent).build(),
        UsageBuilder::new("b", 4).timestamp(recent).build(),
        UsageBuilder::new("c1", 10)
            .event_name("connections")
            .feature("feat_conn", "meter_conn")
            .timestamp(recent)
            .build(),
        UsageBuilder::new("c2", 6)
            .event_name("connections")
            .feature("feat_conn", "meter_conn")
            .timestamp(recent)
            .build(),
    ];
    let bucketed = vec![MaxBucketFeatureInfo {
        feature_id: "feat_conn".to_string(),
        meter_id: "meter_conn".to_string(),
        event_name: "connections".to_string(),
        bucket_size: WindowSize::Hour,
    }];
    let seed = serde_json::json!({
        "feature_usage": rows,
        "max_bucket_features": bucketed,
    });

    let mut file = tempfile::NamedTempFile::new().expect("Failed to create seed file");
    file.write_all(seed.to_string().as_bytes())
        .expect("Failed to write seed file");
    file
}

#[tokio::test]
async fn build_replays_seed_and_reports() {
    init_test_tracing();
    let seed = write_seed();

    let app = Application::build(config(Some(seed.path().to_path_buf())))
        .await
        .unwrap();
    assert!(app.max_bucket_features().contains_key("feat_conn"));

    let report = app.run_report().await.unwrap();
    let summary: Vec<_> = report
        .iter()
        .map(|a| (a.feature_id.as_str(), a.aggregation_type, a.total_usage))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("feat_api", AggregationType::Sum, Decimal::from(7)),
            ("feat_conn", AggregationType::Max, Decimal::from(10)),
        ]
    );
}

#[tokio::test]
async fn missing_seed_file_fails_the_build() {
    init_test_tracing();
    let path = std::env::temp_dir().join("metering-seed-that-does-not-exist.json");

    assert!(Application::build(config(Some(path))).await.is_err());
}

#[tokio::test]
async fn build_without_seed_reports_nothing() {
    init_test_tracing();
    let app = Application::build(config(None)).await.unwrap();

    assert!(app.run_report().await.unwrap().is_empty());
}

#[tokio::test]
async fn seed_can_be_loaded_after_build() {
    init_test_tracing();
    let seed = write_seed();
    let mut app = Application::build(config(None)).await.unwrap();

    let rows = app.load_seed(seed.path()).await.unwrap();
    assert_eq!(rows, 4);
    assert_eq!(app.engine().default_lookback(), Duration::hours(6));
}

#[tokio::test]
async fn out_of_range_default_lookback_fails_the_build() {
    init_test_tracing();
    let mut config = config(None);
    config.engine.default_lookback_hours = i64::MAX;

    assert!(Application::build(config).await.is_err());
}

#[tokio::test]
async fn out_of_range_report_lookback_fails_the_report() {
    init_test_tracing();
    let mut config = config(None);
    config.report.lookback_hours = Some(i64::MAX);
    let app = Application::build(config).await.unwrap();

    assert!(app.run_report().await.is_err());
}
