//! Detailed usage analytics integration tests for metering-service.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{
    at, base_time, TestEngine, UsageBuilder, TEST_CUSTOMER_ID, TEST_ENVIRONMENT_ID,
    TEST_TENANT_ID,
};
use metering_service::models::{
    AggregationType, MaxBucketFeatureInfo, UsageAnalyticsParams, WindowSize,
};
use metering_service::services::UsageError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

fn params() -> UsageAnalyticsParams {
    UsageAnalyticsParams {
        tenant_id: TEST_TENANT_ID.to_string(),
        environment_id: TEST_ENVIRONMENT_ID.to_string(),
        customer_id: TEST_CUSTOMER_ID.to_string(),
        start_time: Some(base_time()),
        end_time: Some(base_time() + Duration::days(1)),
        ..Default::default()
    }
}

fn connections_feature() -> BTreeMap<String, MaxBucketFeatureInfo> {
    let mut features = BTreeMap::new();
    features.insert(
        "feat_conn".to_string(),
        MaxBucketFeatureInfo {
            feature_id: "feat_conn".to_string(),
            meter_id: "meter_conn".to_string(),
            event_name: "connections".to_string(),
            bucket_size: WindowSize::Hour,
        },
    );
    features
}

fn connection(hash: &str, qty: i64, minutes: i64) -> metering_service::models::FeatureUsage {
    UsageBuilder::new(hash, qty)
        .event_name("connections")
        .feature("feat_conn", "meter_conn")
        .line_item("li_conn")
        .minutes(minutes)
        .build()
}

#[tokio::test]
async fn invalid_group_by_fails_before_querying() {
    let app = TestEngine::spawn();
    app.insert(vec![UsageBuilder::new("a", 1).build()]).await;

    let mut request = params();
    request.group_by = vec!["feature_id".to_string(), "customer_id".to_string()];
    let result = app
        .engine
        .get_detailed_usage_analytics(&request, &BTreeMap::new())
        .await;

    assert!(matches!(result, Err(UsageError::InvalidGroupBy(_))));
}

#[tokio::test]
async fn reversed_range_is_rejected() {
    let app = TestEngine::spawn();

    let mut request = params();
    request.end_time = Some(base_time() - Duration::hours(1));
    let result = app
        .engine
        .get_detailed_usage_analytics(&request, &BTreeMap::new())
        .await;

    assert!(matches!(result, Err(UsageError::Validation(_))));
}

#[tokio::test]
async fn standard_features_report_every_figure_per_feature() {
    let app = TestEngine::spawn();
    let mut other_customer = UsageBuilder::new("x", 100).build();
    other_customer.customer_id = "someone_else".to_string();
    app.insert(vec![
        UsageBuilder::new("a", 2).minutes(10).build(),
        UsageBuilder::new("b", 5).minutes(20).build(),
        UsageBuilder::new("c", 3).minutes(70).build(),
        UsageBuilder::new("d", 4)
            .feature("feat_storage", "meter_storage")
            .event_name("storage")
            .build(),
        other_customer,
    ])
    .await;

    let analytics = app
        .engine
        .get_detailed_usage_analytics(&params(), &BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(analytics.len(), 2);
    let api = &analytics[0];
    assert_eq!(api.feature_id, "feat_api");
    assert_eq!(api.event_name, "api_call");
    assert_eq!(api.aggregation_type, AggregationType::Sum);
    assert_eq!(api.total_usage, Decimal::from(10));
    assert_eq!(api.max_usage, Decimal::from(5));
    assert_eq!(api.latest_usage, Decimal::from(3));
    assert_eq!(api.count_unique_usage, 3);
    assert_eq!(api.event_count, 3);
    assert_eq!(api.total_cost, Decimal::ZERO);
    assert!(api.points.is_empty());
    assert!(api.source.is_empty());

    assert_eq!(analytics[1].feature_id, "feat_storage");
    assert_eq!(analytics[1].total_usage, Decimal::from(4));
}

#[tokio::test]
async fn bucketed_feature_reports_sum_of_bucket_peaks() {
    let app = TestEngine::spawn();
    app.insert(vec![
        connection("c1", 10, 5),
        connection("c2", 20, 30),
        connection("c3", 7, 70),
        UsageBuilder::new("a", 1).minutes(10).build(),
    ])
    .await;

    let mut request = params();
    request.feature_ids = vec!["feat_conn".to_string()];
    request.window_size = Some(WindowSize::Hour);
    let analytics = app
        .engine
        .get_detailed_usage_analytics(&request, &connections_feature())
        .await
        .unwrap();

    assert_eq!(analytics.len(), 1);
    let conn = &analytics[0];
    assert_eq!(conn.feature_id, "feat_conn");
    assert_eq!(conn.event_name, "connections");
    assert_eq!(conn.aggregation_type, AggregationType::Max);
    assert_eq!(conn.total_usage, Decimal::from(27));
    assert_eq!(conn.max_usage, Decimal::from(20));
    assert_eq!(conn.event_count, 3);

    let points: Vec<_> = conn.points.iter().map(|p| (p.timestamp, p.usage)).collect();
    assert_eq!(
        points,
        vec![(base_time(), Decimal::from(20)), (at(60), Decimal::from(7))]
    );
}

#[tokio::test]
async fn all_features_lists_standard_before_bucketed() {
    let app = TestEngine::spawn();
    app.insert(vec![
        connection("c1", 10, 5),
        connection("c2", 20, 30),
        UsageBuilder::new("a", 1).minutes(10).build(),
        UsageBuilder::new("b", 2).minutes(20).build(),
    ])
    .await;

    let analytics = app
        .engine
        .get_detailed_usage_analytics(&params(), &connections_feature())
        .await
        .unwrap();

    let summary: Vec<_> = analytics
        .iter()
        .map(|a| (a.feature_id.as_str(), a.aggregation_type, a.total_usage))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("feat_api", AggregationType::Sum, Decimal::from(3)),
            ("feat_conn", AggregationType::Max, Decimal::from(20)),
        ]
    );
}

#[tokio::test]
async fn groups_by_source_and_property() {
    let app = TestEngine::spawn();
    app.insert(vec![
        UsageBuilder::new("a", 1).source("sdk").property("region", "us").build(),
        UsageBuilder::new("b", 2).source("sdk").property("region", "us").build(),
        UsageBuilder::new("c", 4).source("api").property("region", "eu").build(),
        UsageBuilder::new("d", 8).source("sdk").build(),
    ])
    .await;

    let mut request = params();
    request.group_by = vec!["source".to_string(), "properties.region".to_string()];
    let analytics = app
        .engine
        .get_detailed_usage_analytics(&request, &BTreeMap::new())
        .await
        .unwrap();

    let summary: Vec<_> = analytics
        .iter()
        .map(|a| {
            (
                a.source.as_str(),
                a.properties.get("region").cloned().unwrap_or_default(),
                a.total_usage,
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("api", "eu".to_string(), Decimal::from(4)),
            ("sdk", String::new(), Decimal::from(8)),
            ("sdk", "us".to_string(), Decimal::from(3)),
        ]
    );
    assert!(analytics.iter().all(|a| a.feature_id.is_empty()));
}

#[tokio::test]
async fn monthly_points_follow_the_billing_anchor() {
    let app = TestEngine::spawn();
    app.insert(vec![UsageBuilder::new("a", 6).build()]).await;

    let mut request = params();
    request.window_size = Some(WindowSize::Month);
    request.billing_anchor = Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
    let analytics = app
        .engine
        .get_detailed_usage_analytics(&request, &BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(analytics.len(), 1);
    assert_eq!(analytics[0].points.len(), 1);
    assert_eq!(
        analytics[0].points[0].timestamp,
        Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap()
    );
    assert_eq!(analytics[0].points[0].usage, Decimal::from(6));
}

#[tokio::test]
async fn missing_start_uses_default_lookback() {
    let app = TestEngine::spawn();
    app.insert(vec![
        UsageBuilder::new("early", 1).minutes(60).build(),
        UsageBuilder::new("late", 9).minutes(300).build(),
    ])
    .await;

    let mut request = params();
    request.start_time = None;
    request.end_time = Some(at(600));
    let analytics = app
        .engine
        .get_detailed_usage_analytics(&request, &BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(app.engine.default_lookback(), Duration::hours(6));
    assert_eq!(analytics.len(), 1);
    assert_eq!(analytics[0].total_usage, Decimal::from(9));
}

#[tokio::test]
async fn retraction_after_range_end_removes_the_fact() {
    let app = TestEngine::spawn();
    app.insert(vec![
        UsageBuilder::new("a", 5).minutes(10).build(),
        UsageBuilder::new("a", 5).version(2, -1).minutes(90).build(),
        UsageBuilder::new("b", 3).minutes(20).build(),
    ])
    .await;

    let mut request = params();
    request.end_time = Some(at(60));
    let analytics = app
        .engine
        .get_detailed_usage_analytics(&request, &BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(analytics.len(), 1);
    assert_eq!(analytics[0].total_usage, Decimal::from(3));
    assert_eq!(analytics[0].event_count, 1);
}
