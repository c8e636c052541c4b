use anyhow::Result;
use colored::Colorize;
use log_aggregator::{config, init_tracing, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// This will:
/// 1. Load configuration
/// 2. Initialize tracing with the configured level and format
/// 3. Start the server (blocks until shutdown)
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Starting log aggregator...".green());

    let cfg = config::load_config(config_path)?;
    init_tracing(&cfg.server.log_level, &cfg.server.log_format);

    info!(
        config = %config_path.display(),
        "Starting log aggregator in foreground mode"
    );

    server::start_server(cfg).await?;

    Ok(())
}
