//! Tracing subscriber setup for binaries embedding the provisioner.
//!
//! The library itself only emits events; installing a subscriber is left
//! to the host process.

use crate::errors::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable, one line per event.
    #[default]
    Compact,
    /// Multi-line output for local debugging.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Builds the event filter, preferring `RUST_LOG` over `default_filter`.
pub fn env_filter(default_filter: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|err| ProvisionError::Config(format!("invalid log filter: {err}"))),
    }
}

/// Installs the global subscriber.
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> Result<()> {
    let filter = env_filter(default_filter)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init(),
    };
    installed.map_err(|err| ProvisionError::Internal(format!("failed to install subscriber: {err}")))
}
