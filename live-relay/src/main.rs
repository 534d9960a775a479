use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use live_relay::cli::Args;
use live_relay::services::{ContainerOptions, ServiceContainer};
use live_relay::settings::Settings;
use live_relay::utils::http_client::install_rustls_provider;
use live_relay::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    if let Some(dir) = &args.log_dir {
        settings.logging.dir = dir.clone();
    }

    let (logging_config, _guard) =
        logging::init_logging(&settings.logging).context("Failed to initialize logging")?;
    panic_hook::install(logging_config.log_dir());
    install_rustls_provider();

    info!(version = env!("CARGO_PKG_VERSION"), "live-relay starting");

    let container = ServiceContainer::new(
        settings,
        ContainerOptions {
            skip_download: args.skip_download(),
            ..ContainerOptions::default()
        },
    )
    .await
    .context("Failed to initialize services")?;

    logging_config.start_retention_cleanup(container.cancellation_token());
    container.start();
    info!("live-relay initialized successfully");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    container.shutdown().await;
    Ok(())
}
