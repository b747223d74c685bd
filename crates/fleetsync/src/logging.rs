//! Process-wide logging setup.
//!
//! Library code logs through the `log` facade; the daemon installs a
//! `tracing-subscriber` registry and bridges `log` records into it.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::FleetError;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` overrides the configured
/// level. Calling this more than once is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<(), FleetError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| FleetError::Logging(format!("invalid log filter '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Text => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
        }
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    result.map_err(|e| FleetError::Logging(e.to_string()))?;

    // Fails only when the host already installed a `log` logger.
    let _ = tracing_log::LogTracer::init();

    let _ = INITIALIZED.set(());
    Ok(())
}
