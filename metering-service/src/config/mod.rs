//! Configuration module for metering-service.

use crate::models::WindowSize;
use crate::services::{DEFAULT_BATCH_SIZE, DEFAULT_LOOKBACK_HOURS};
use chrono::Duration;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MeteringConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub engine: EngineConfig,
    /// JSON file of feature usage rows replayed at start-up.
    pub seed_path: Option<PathBuf>,
    pub report: ReportConfig,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub default_lookback_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            default_lookback_hours: DEFAULT_LOOKBACK_HOURS,
        }
    }
}

/// Scope of the analytics report printed by the binary.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub tenant_id: String,
    pub environment_id: String,
    /// Empty reports every customer.
    pub customer_id: String,
    pub window_size: Option<WindowSize>,
    pub group_by: Vec<String>,
    pub lookback_hours: Option<i64>,
}

impl MeteringConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = common.is_prod()
            || env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let default_lookback_hours = env::var("METERING_DEFAULT_LOOKBACK_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LOOKBACK_HOURS);
        hours_duration("METERING_DEFAULT_LOOKBACK_HOURS", default_lookback_hours)?;

        let report_lookback_hours: Option<i64> = env::var("METERING_REPORT_LOOKBACK_HOURS")
            .ok()
            .and_then(|s| s.parse().ok());
        if let Some(hours) = report_lookback_hours {
            hours_duration("METERING_REPORT_LOOKBACK_HOURS", hours)?;
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "metering-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|e| !e.is_empty()),
            engine: EngineConfig {
                batch_size: env::var("METERING_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_BATCH_SIZE),
                default_lookback_hours,
            },
            seed_path: env::var("METERING_SEED_PATH").ok().map(PathBuf::from),
            report: ReportConfig {
                tenant_id: get_env("METERING_REPORT_TENANT_ID", Some("tenant_dev"), is_prod)?,
                environment_id: get_env(
                    "METERING_REPORT_ENVIRONMENT_ID",
                    Some("env_dev"),
                    is_prod,
                )?,
                customer_id: get_env("METERING_REPORT_CUSTOMER_ID", Some(""), is_prod)?,
                window_size: env::var("METERING_REPORT_WINDOW_SIZE")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(|s| WindowSize::from_string(&s)),
                group_by: parse_list(&env::var("METERING_REPORT_GROUP_BY").unwrap_or_default()),
                lookback_hours: report_lookback_hours,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// A positive number of hours as a `Duration`.
pub fn hours_duration(key: &str, hours: i64) -> Result<Duration, AppError> {
    Duration::try_hours(hours)
        .filter(|d| *d > Duration::zero())
        .ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!(
                "{} must be a positive number of hours, got {}",
                key,
                hours
            ))
        })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
