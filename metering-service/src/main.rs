//! Metering Service entry point.
//!
//! Replays the configured seed file into the engine and prints the detailed
//! usage analytics report as JSON.

use metering_service::config::MeteringConfig;
use metering_service::services::{get_metrics, init_metrics};
use metering_service::startup::Application;

use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let config = MeteringConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    // Initialize tracing
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = %config.service_version,
        otlp_endpoint = ?config.otlp_endpoint,
        "Starting metering-service"
    );

    // Initialize metrics
    init_metrics();

    tracing::info!(
        service_name = %config.service_name,
        batch_size = config.engine.batch_size,
        default_lookback_hours = config.engine.default_lookback_hours,
        seed_path = ?config.seed_path,
        report_tenant_id = %config.report.tenant_id,
        report_environment_id = %config.report.environment_id,
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    let analytics = app.run_report().await.map_err(|e| {
        tracing::error!(error = %e, "Usage report failed");
        std::io::Error::other(format!("Report error: {}", e))
    })?;

    let output = serde_json::to_string_pretty(&analytics).map_err(std::io::Error::other)?;
    println!("{}", output);

    tracing::info!(rows = analytics.len(), "Usage report complete");
    tracing::info!(metrics = %get_metrics(), "Metrics snapshot");
    Ok(())
}
