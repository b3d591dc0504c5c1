//! Climate Station - Main Entry Point

use station::{init_logging, run, StationConfig};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = StationConfig::load(path.as_deref())?;
    init_logging(&config)?;

    info!("=== Climate Station v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Starting sensor acquisition and uplink...");

    let report = run(config).await?;
    info!(
        "Stopped: {} samples acquired, {} overwritten, {} unsent",
        report.stats.total_pushed, report.stats.overwritten, report.discarded
    );

    Ok(())
}
