use anyhow::Context;
use reportd::config::AppConfig;
use reportd::services::ServiceContainer;
use reportd::{database, logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;

    // Initialize logging; the guard flushes file output on exit
    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir).context("failed to initialize logging")?;
    if let Some(directive) = &config.log_filter {
        logging_config.set_filter(directive)?;
    }
    tracing::info!(filter = %logging_config.get_filter(), "Logging initialized");
    panic_hook::install(&config.log_dir);

    // Initialize database
    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    database::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let mut container = ServiceContainer::new(pool, config).await?;
    logging_config.start_retention_cleanup(container.cancellation_token());
    container.start()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "reportd started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    container.shutdown().await;
    Ok(())
}
