//! Provisioner configuration.

use crate::errors::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every pipeline run of a provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Fan-out worker count. Zero means one worker per container.
    #[serde(default)]
    pub max_workers: usize,
    /// Number of application images kept after a deploy.
    #[serde(default = "default_image_history_size")]
    pub image_history_size: usize,
    /// Grace period used when stopping a container during rollback.
    #[serde(default = "default_stop_grace_period")]
    pub stop_grace_period_secs: u64,
    /// Interval between cancellation polls while following build logs.
    #[serde(default = "default_cancel_poll_interval")]
    pub cancel_poll_interval_ms: u64,
    /// Command executed inside build containers.
    #[serde(default = "default_deploy_cmd")]
    pub deploy_cmd: String,
    /// Run command for legacy units without declared processes.
    #[serde(default)]
    pub run_cmd: Option<String>,
    /// Control-plane address handed to the unit agent.
    #[serde(default)]
    pub host: String,
}

fn default_image_history_size() -> usize {
    10
}

fn default_stop_grace_period() -> u64 {
    10
}

fn default_cancel_poll_interval() -> u64 {
    1000
}

fn default_deploy_cmd() -> String {
    "/var/lib/tsuru/deploy".to_string()
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            image_history_size: default_image_history_size(),
            stop_grace_period_secs: default_stop_grace_period(),
            cancel_poll_interval_ms: default_cancel_poll_interval(),
            deploy_cmd: default_deploy_cmd(),
            run_cmd: None,
            host: String::new(),
        }
    }
}

impl ProvisionConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|err| ProvisionError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the pipelines rely on.
    pub fn validate(&self) -> Result<()> {
        if self.image_history_size == 0 {
            return Err(ProvisionError::Config(
                "image_history_size must be greater than zero".to_string(),
            ));
        }
        if self.cancel_poll_interval_ms == 0 {
            return Err(ProvisionError::Config(
                "cancel_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the fan-out worker count.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Sets the image history size.
    #[must_use]
    pub fn with_image_history_size(mut self, size: usize) -> Self {
        self.image_history_size = size;
        self
    }

    /// Sets the cancellation poll interval.
    #[must_use]
    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the legacy run command.
    #[must_use]
    pub fn with_run_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.run_cmd = Some(cmd.into());
        self
    }

    /// Sets the control-plane host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Gets the cancellation poll interval as a Duration.
    #[must_use]
    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }
}
