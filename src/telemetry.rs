//! Log output

use crate::config::LoggingConfig;
use crate::error::Result;

/// Install a fmt subscriber at the configured level.
///
/// A subscriber that is already installed stays in place.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let level = config.level()?;
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.with_target)
        .try_init()
        .is_ok();
    tracing::debug!(%level, installed, "tracing initialised");
    Ok(())
}
