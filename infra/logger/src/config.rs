use crate::error::LoggerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;

pub(crate) const DEFAULT_MAX_FILES: usize = 10;

/// File-friendly logger settings, usually a `[log]` table of an application config.
///
/// ```toml
/// [log]
/// level = "debug"
/// filter = "courier_events=trace"
/// directory = "logs"
/// rotation = "hourly"
/// json = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level: `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
    pub console: bool,
    /// Enables the rolling file layer when set.
    pub directory: Option<PathBuf>,
    /// Writes file output as JSON lines. Console output stays human readable.
    pub json: bool,
    pub rotation: LogRotation,
    pub max_files: usize,
    /// Per-target directives (`courier_events=debug,courier_relay=info`).
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            console: true,
            directory: None,
            json: false,
            rotation: LogRotation::default(),
            max_files: DEFAULT_MAX_FILES,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Parses [`LogConfig::level`].
    ///
    /// # Errors
    /// Returns [`LoggerError::InvalidConfiguration`] for an unknown level name.
    pub fn level_filter(&self) -> Result<LevelFilter, LoggerError> {
        self.level.trim().parse::<LevelFilter>().map_err(|e| {
            LoggerError::invalid(format!("Unknown log level '{}': {e}", self.level))
        })
    }
}

/// How often the file layer starts a new file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Self::MINUTELY,
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: LogConfig =
            serde_json::from_str(r#"{ "level": "debug", "rotation": "hourly" }"#).unwrap();
        assert_eq!(config.level_filter().unwrap(), LevelFilter::DEBUG);
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert!(config.console);
        assert_eq!(config.max_files, DEFAULT_MAX_FILES);
        assert!(config.directory.is_none());
    }

    #[test]
    fn test_unknown_level_rejected() {
        let config = LogConfig { level: "loud".to_owned(), ..LogConfig::default() };
        assert!(matches!(config.level_filter(), Err(LoggerError::InvalidConfiguration { .. })));
    }
}
