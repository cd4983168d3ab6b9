//! sourcing-gateway CLI entry point.

mod cli;

use clap::Parser;
use cli::{Cli, LogFormat};
use sourcing_gateway::{GatewayBuilder, GatewayEvent};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();
    let log_format = cli.log_format;
    let write_config = cli.write_config;
    let config_path = cli.config_path();

    // Build configuration
    let config = cli.into_config()?;

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }

    info!("sourcing-gateway v{}", env!("CARGO_PKG_VERSION"));

    if write_config {
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        config.to_file(&config_path)?;
        info!("Configuration written to {}", config_path.display());
        return Ok(());
    }

    // Build and run the gateway
    let mut gateway = GatewayBuilder::new(config).build().await?;

    let mut events = gateway.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                GatewayEvent::PaymentAccepted { address, tx_hash } => {
                    info!(%address, %tx_hash, "Subscription payment accepted");
                }
                other => debug!(event = ?other, "Gateway event"),
            }
        }
    });

    // Run until shutdown
    gateway.run().await?;

    info!("Goodbye!");
    Ok(())
}
