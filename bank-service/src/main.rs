use bank_service::{config::BankConfig, services::metrics::init_metrics, Application};
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = BankConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        broker = %config.broker.redacted_uri(),
        "Starting bank service"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
