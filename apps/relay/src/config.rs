use anyhow::{Context, Result};
use courier_events::{HubOptions, load_config};
use courier_logger::LogConfig;
use serde::Deserialize;
use std::path::Path;

/// Relay configuration file: a `[hub]` and a `[log]` table, both optional.
///
/// Any key can be overridden from the environment, e.g.
/// `COURIER__HUB__MAX_QUEUE_CAPACITY=64` or `COURIER__LOG__LEVEL=debug`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub hub: HubOptions,
    pub log: LogConfig,
}

impl RelayConfig {
    /// Loads `path`, or the defaults when no file was given.
    ///
    /// # Errors
    /// Fails when the file cannot be read or parsed, or holds an invalid hub capacity.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let config: Self = load_config(path)
            .with_context(|| format!("Failed to load relay config from {}", path.display()))?;
        config.hub.validate().context("Invalid [hub] section")?;
        Ok(config)
    }
}
