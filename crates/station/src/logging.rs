//! Logging setup

use crate::settings::StationConfig;
use tracing_subscriber::FmtSubscriber;

/// Install the global tracing subscriber
pub fn init_logging(config: &StationConfig) -> anyhow::Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(config.log_level()?)
        .with_target(true);

    if config.log.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}
