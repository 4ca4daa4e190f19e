//! Structured logging setup

use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    error::{Error, Result},
};

/// Install a JSON `tracing` subscriber filtered by `service.log_level`
///
/// An unparsable filter falls back to `info`. Installing twice is an error.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!(
        service = %config.service.name,
        environment = %config.service.environment,
        "tracing initialized"
    );
    Ok(())
}
