//! Logging initialization for conclave processes.

use crate::error::{ConclaveError, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the process.
///
/// `RUST_LOG` takes precedence over `log_level` when set. Initializing twice
/// returns an error, so embedding applications that configure their own
/// subscriber should simply not call this.
pub fn init(log_level: &str, json_logs: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ConclaveError::Internal(format!("failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ConclaveError::Internal(format!("failed to init logging: {}", e)))?;
    }

    Ok(())
}
