//! Application startup and lifecycle management.

use crate::config::{hours_duration, MeteringConfig};
use crate::models::{DetailedUsageAnalytic, FeatureUsage, MaxBucketFeatureInfo, UsageAnalyticsParams};
use crate::services::{init_metrics, InMemoryFeatureUsageStore, MeteringEngine};
use chrono::Utc;
use serde::Deserialize;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Contents of a seed file.
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    pub feature_usage: Vec<FeatureUsage>,
    /// Features whose meters aggregate as MAX-with-bucket.
    #[serde(default)]
    pub max_bucket_features: Vec<MaxBucketFeatureInfo>,
}

/// Application container holding the engine and its meter configuration.
pub struct Application {
    config: MeteringConfig,
    engine: MeteringEngine,
    max_bucket_features: BTreeMap<String, MaxBucketFeatureInfo>,
}

impl Application {
    /// Build the application and replay the seed file, if configured.
    pub async fn build(config: MeteringConfig) -> Result<Self, AppError> {
        init_metrics();

        let default_lookback = hours_duration(
            "METERING_DEFAULT_LOOKBACK_HOURS",
            config.engine.default_lookback_hours,
        )?;
        let store = Arc::new(InMemoryFeatureUsageStore::new());
        let engine = MeteringEngine::new(store, config.engine.batch_size)
            .with_default_lookback(default_lookback);

        let mut app = Self {
            config,
            engine,
            max_bucket_features: BTreeMap::new(),
        };

        if let Some(path) = app.config.seed_path.clone() {
            let rows = app.load_seed(&path).await.map_err(|e| {
                tracing::error!(error = %e, path = %path.display(), "Failed to load seed file");
                e
            })?;
            tracing::info!(rows, path = %path.display(), "Seed file loaded");
        }

        Ok(app)
    }

    pub fn engine(&self) -> &MeteringEngine {
        &self.engine
    }

    pub fn max_bucket_features(&self) -> &BTreeMap<String, MaxBucketFeatureInfo> {
        &self.max_bucket_features
    }

    /// Bulk insert the rows of a seed file and register its bucketed features.
    pub async fn load_seed(&mut self, path: &Path) -> Result<usize, AppError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: SeedFile = serde_json::from_str(&raw)?;

        for info in seed.max_bucket_features {
            self.max_bucket_features.insert(info.feature_id.clone(), info);
        }
        let rows = self.engine.bulk_insert_feature_usage(seed.feature_usage).await?;
        Ok(rows)
    }

    /// Run the configured analytics report.
    pub async fn run_report(&self) -> Result<Vec<DetailedUsageAnalytic>, AppError> {
        let report = &self.config.report;
        let end_time = Utc::now();
        let start_time = match report.lookback_hours {
            Some(hours) => {
                let lookback = hours_duration("METERING_REPORT_LOOKBACK_HOURS", hours)?;
                let start = end_time.checked_sub_signed(lookback).ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "METERING_REPORT_LOOKBACK_HOURS={} reaches before the supported time range",
                        hours
                    ))
                })?;
                Some(start)
            }
            None => None,
        };

        let params = UsageAnalyticsParams {
            tenant_id: report.tenant_id.clone(),
            environment_id: report.environment_id.clone(),
            customer_id: report.customer_id.clone(),
            start_time,
            end_time: Some(end_time),
            group_by: report.group_by.clone(),
            window_size: report.window_size,
            ..Default::default()
        };

        let analytics = self
            .engine
            .get_detailed_usage_analytics(&params, &self.max_bucket_features)
            .await?;
        Ok(analytics)
    }
}
