//! Log subscriber installation.

use ticktrail_core::config::{ConfigError, LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

use crate::error::IngestError;

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
pub fn init(config: &LoggingConfig) -> Result<(), IngestError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| ConfigError::Invalid {
            reason: format!("logging.level {:?} is not a filter directive: {e}", config.level),
        })?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| IngestError::Logging {
        message: e.to_string(),
    })
}
