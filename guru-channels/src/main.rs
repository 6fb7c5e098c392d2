//! Guru Channels - Main entry point.

use anyhow::Result;
use guru_channels::start_server;
use guru_common::config::Config;
use guru_common::logging::init_logging_with_exclusions;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_and_validate()?;

    // Initialize logging
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Travel Guru Channels v{}", env!("CARGO_PKG_VERSION"));

    // Start the HTTP server
    start_server(&config).await
}
