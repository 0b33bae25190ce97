use crate::error::{EventHubError, EventHubErrorExt};
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment prefix for configuration overrides (e.g. `COURIER__HUB__MAX_QUEUE_CAPACITY`).
pub const ENV_PREFIX: &str = "COURIER";

const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// What a bounded queue does when a publish finds it full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullQueuePolicy {
    /// Wait for capacity, bounded by the backpressure timeout.
    #[default]
    Block,
    /// Evict the oldest queued item to make room for the new one.
    DropOldest,
    /// Discard the item being published.
    DropNewest,
}

/// Per-hub configuration.
///
/// Deserializes from any format supported by the `config` crate; missing fields fall back
/// to [`HubOptions::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubOptions {
    /// Maximum items per queue. `None` means unbounded.
    pub max_queue_capacity: Option<usize>,
    pub full_queue_policy: FullQueuePolicy,
    /// How long a blocked publish waits for capacity. `None` waits until capacity frees up
    /// or the publisher cancels.
    pub backpressure_timeout_ms: Option<u64>,
    /// Await every handler of an item before dequeuing the next one.
    pub strict_completion: bool,
    pub metrics_enabled: bool,
    /// Safety timeout for [`EventHub::drain`](crate::EventHub::drain).
    pub drain_timeout_ms: u64,
    /// Upper bound on how long `close` waits for background loops.
    pub shutdown_timeout_ms: u64,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            max_queue_capacity: None,
            full_queue_policy: FullQueuePolicy::Block,
            backpressure_timeout_ms: Some(DEFAULT_BACKPRESSURE_TIMEOUT_MS),
            strict_completion: true,
            metrics_enabled: true,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl HubOptions {
    #[must_use = "Bounds every queue owned by the hub"]
    pub const fn with_max_queue_capacity(mut self, capacity: usize) -> Self {
        self.max_queue_capacity = Some(capacity);
        self
    }

    #[must_use = "Lets every queue grow without bound"]
    pub const fn unbounded(mut self) -> Self {
        self.max_queue_capacity = None;
        self
    }

    #[must_use = "Selects what happens when a bounded queue is full"]
    pub const fn with_full_queue_policy(mut self, policy: FullQueuePolicy) -> Self {
        self.full_queue_policy = policy;
        self
    }

    #[must_use = "Limits how long a publish may wait for queue capacity"]
    pub const fn with_backpressure_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.backpressure_timeout_ms = match timeout {
            Some(timeout) => Some(duration_to_ms(timeout)),
            None => None,
        };
        self
    }

    #[must_use = "Switches between strict completion and fire-and-collect dispatch"]
    pub const fn with_strict_completion(mut self, strict: bool) -> Self {
        self.strict_completion = strict;
        self
    }

    #[must_use = "Toggles the built-in metrics sink"]
    pub const fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    #[must_use = "Sets the safety timeout used by drain"]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = duration_to_ms(timeout);
        self
    }

    #[must_use = "Sets how long close waits for background loops"]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = duration_to_ms(timeout);
        self
    }

    #[must_use]
    pub fn backpressure_timeout(&self) -> Option<Duration> {
        self.backpressure_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Checks the options for values the hub cannot honor.
    ///
    /// # Errors
    /// Returns [`EventHubError::InvalidCapacity`] when `max_queue_capacity` is zero.
    pub fn validate(&self) -> Result<(), EventHubError> {
        if self.max_queue_capacity == Some(0) {
            return Err(EventHubError::InvalidCapacity {
                message: "max_queue_capacity must be >= 1 (omit it for unbounded queues)".into(),
                context: None,
            });
        }
        Ok(())
    }

    /// Loads options from a file, overlaid with `COURIER__`-prefixed environment variables.
    ///
    /// # Errors
    /// Returns [`EventHubError::Config`] when the file is missing or malformed, and
    /// [`EventHubError::InvalidCapacity`] when the loaded options fail validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EventHubError> {
        let options: Self = load_config(path)?;
        options.validate()?;
        Ok(options)
    }
}

/// A reusable configuration loader that combines file-based settings with environment overrides.
///
/// 1. **Base File**: any format recognized by extension (`.toml`, `.json`, `.yaml`, ...).
/// 2. **Environment Overrides**: variables prefixed with `COURIER__`; nested keys use double
///    underscores (e.g. `COURIER__HUB__STRICT_COMPLETION=false` maps to `hub.strict_completion`).
///
/// # Errors
/// Returns [`EventHubError::Config`] if the file cannot be read or does not match `T`.
///
/// # Example
/// ```rust,no_run
/// use courier_events::{HubOptions, load_config};
///
/// #[derive(Default, serde::Deserialize)]
/// struct RelayConfig {
///     hub: HubOptions,
/// }
///
/// let cfg: RelayConfig = load_config("relay.toml").unwrap_or_default();
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T, EventHubError>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();

    let builder = Config::builder().add_source(File::from(path).required(true)).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .convert_case(config::Case::Snake)
            .try_parsing(true),
    );

    info!(path = %path.display(), "Loading configuration");

    builder
        .build()
        .context("Failed to build config")?
        .try_deserialize::<T>()
        .context("Failed to deserialize config")
}

const fn duration_to_ms(duration: Duration) -> u64 {
    let ms = duration.as_millis();
    if ms > u64::MAX as u128 { u64::MAX } else { ms as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_unbounded_and_strict() {
        let options = HubOptions::default();
        assert_eq!(options.max_queue_capacity, None);
        assert_eq!(options.full_queue_policy, FullQueuePolicy::Block);
        assert!(options.strict_completion);
        assert!(options.metrics_enabled);
        assert_eq!(options.backpressure_timeout(), Some(Duration::from_secs(5)));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let options = HubOptions::default().with_max_queue_capacity(0);
        assert!(matches!(options.validate(), Err(EventHubError::InvalidCapacity { .. })));
    }

    #[test]
    fn test_builder_setters() {
        let options = HubOptions::default()
            .with_max_queue_capacity(8)
            .with_full_queue_policy(FullQueuePolicy::DropOldest)
            .with_backpressure_timeout(Some(Duration::from_millis(10)))
            .with_strict_completion(false)
            .with_metrics(false);

        assert_eq!(options.max_queue_capacity, Some(8));
        assert_eq!(options.full_queue_policy, FullQueuePolicy::DropOldest);
        assert_eq!(options.backpressure_timeout_ms, Some(10));
        assert!(!options.strict_completion);
        assert!(!options.metrics_enabled);

        let options = options.unbounded().with_backpressure_timeout(None);
        assert_eq!(options.max_queue_capacity, None);
        assert_eq!(options.backpressure_timeout(), None);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "max_queue_capacity = 32\nfull_queue_policy = \"drop_newest\"\nstrict_completion = false"
        )
        .unwrap();

        let options = HubOptions::load(file.path()).unwrap();
        assert_eq!(options.max_queue_capacity, Some(32));
        assert_eq!(options.full_queue_policy, FullQueuePolicy::DropNewest);
        assert!(!options.strict_completion);
        assert_eq!(options.drain_timeout_ms, DEFAULT_DRAIN_TIMEOUT_MS);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let result = HubOptions::load("definitely/not/here.toml");
        assert!(matches!(result, Err(EventHubError::Config { .. })));
    }
}
