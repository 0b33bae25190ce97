//! # Courier Logger
//!
//! Installs the process-wide `tracing` subscriber for Courier binaries: a compact console
//! layer, an optional non-blocking rolling file layer (plain or JSON lines) and an
//! [`EnvFilter`] seeded from the configured level, per-target directives and `RUST_LOG`.
//!
//! Configure it in code through [`Logger::builder`], or from a deserialized [`LogConfig`]
//! through [`Logger::from_config`]. File-only settings (rotation, retention, JSON) are only
//! reachable once a directory was given.
//!
//! ## Example
//!
//! ```rust
//! use courier_logger::{LevelFilter, Logger};
//!
//! let _logger = Logger::builder("courier-relay")
//!     .level(LevelFilter::DEBUG)
//!     .filter("courier_events=trace")
//!     .init()
//!     .unwrap();
//! ```

mod config;
mod error;

pub use crate::config::{LogConfig, LogRotation};
pub use crate::error::{LoggerError, LoggerErrorExt};
pub use tracing::level_filters::LevelFilter;

use crate::config::DEFAULT_MAX_FILES;
use private::Sealed;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_SUFFIX: &str = "log";

/// Output state: console only.
#[derive(Debug)]
pub struct ConsoleOnly;

/// Output state: console plus rolling files under a directory.
#[derive(Debug)]
pub struct Rolling {
    directory: PathBuf,
    rotation: Rotation,
    max_files: usize,
    json: bool,
}

mod private {
    pub trait Sealed {
        fn rolling(&self) -> Option<&super::Rolling>;
    }
}

impl Sealed for ConsoleOnly {
    fn rolling(&self) -> Option<&Rolling> {
        None
    }
}

impl Sealed for Rolling {
    fn rolling(&self) -> Option<&Rolling> {
        Some(self)
    }
}

/// Builder for the global subscriber. Obtain one with [`Logger::builder`].
#[derive(Debug)]
pub struct LoggerBuilder<O: Sealed = ConsoleOnly> {
    name: String,
    level: LevelFilter,
    filter: Option<String>,
    console: bool,
    output: O,
}

impl<O: Sealed> LoggerBuilder<O> {
    /// Minimum level for targets without an explicit directive.
    #[must_use = "The builder must be initialized to install the subscriber"]
    pub const fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Per-target directives such as `courier_events=debug`. `RUST_LOG` is ignored once set.
    #[must_use = "The builder must be initialized to install the subscriber"]
    pub fn filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    #[must_use = "The builder must be initialized to install the subscriber"]
    pub const fn console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// Installs the subscriber.
    ///
    /// The returned [`Logger`] owns the file writer's worker; keep it alive until shutdown.
    ///
    /// # Errors
    /// [`LoggerError::InvalidConfiguration`] for an empty name, zero retention, a malformed
    /// filter or when no output is enabled; [`LoggerError::Io`] / [`LoggerError::Appender`]
    /// when the log directory is unusable; [`LoggerError::Subscriber`] when a global
    /// subscriber is already installed.
    pub fn init(self) -> Result<Logger, LoggerError> {
        if self.name.trim().is_empty() {
            return Err(LoggerError::invalid("Logger name cannot be empty"));
        }
        let rolling = self.output.rolling();
        if !self.console && rolling.is_none() {
            return Err(LoggerError::invalid(
                "No output enabled; enable the console or a directory",
            ));
        }

        let filter = env_filter(self.level, self.filter.as_deref())?;
        let mut layers = Vec::new();

        if self.console {
            layers.push(layer().compact().with_ansi(true).boxed());
        }

        let guard = match rolling {
            Some(rolling) => {
                let (file_layer, guard) = file_layer(&self.name, rolling)?;
                layers.push(file_layer);
                Some(guard)
            },
            None => None,
        };

        tracing_subscriber::registry().with(filter).with(layers).try_init()?;
        tracing::debug!(name = %self.name, files = guard.is_some(), "Logger initialized");

        Ok(Logger { name: self.name, guard })
    }
}

impl LoggerBuilder<ConsoleOnly> {
    /// Adds a rolling file layer writing `<name>.<date>.log` files into `directory`.
    pub fn directory(self, directory: impl Into<PathBuf>) -> LoggerBuilder<Rolling> {
        LoggerBuilder {
            name: self.name,
            level: self.level,
            filter: self.filter,
            console: self.console,
            output: Rolling {
                directory: directory.into(),
                rotation: Rotation::DAILY,
                max_files: DEFAULT_MAX_FILES,
                json: false,
            },
        }
    }
}

impl LoggerBuilder<Rolling> {
    #[must_use = "The builder must be initialized to install the subscriber"]
    pub fn rotation(mut self, rotation: LogRotation) -> Self {
        self.output.rotation = rotation.into();
        self
    }

    /// How many rotated files to keep.
    #[must_use = "The builder must be initialized to install the subscriber"]
    pub const fn max_files(mut self, max: usize) -> Self {
        self.output.max_files = max;
        self
    }

    /// Writes JSON lines instead of plain text to the files.
    #[must_use = "The builder must be initialized to install the subscriber"]
    pub const fn json(mut self, enabled: bool) -> Self {
        self.output.json = enabled;
        self
    }

    #[must_use]
    pub fn log_directory(&self) -> &Path {
        &self.output.directory
    }
}

/// Handle to the installed subscriber.
///
/// Holds the non-blocking file writer's guard: buffered lines are flushed when it drops.
#[must_use = "Dropping this handle stops the background file writer"]
#[derive(Debug)]
pub struct Logger {
    name: String,
    guard: Option<WorkerGuard>,
}

impl Logger {
    /// Starts a builder; `name` prefixes the rolling log files.
    #[must_use = "The builder must be initialized to install the subscriber"]
    pub fn builder(name: impl Into<String>) -> LoggerBuilder {
        LoggerBuilder {
            name: name.into(),
            level: LevelFilter::INFO,
            filter: None,
            console: true,
            output: ConsoleOnly,
        }
    }

    /// Installs the subscriber described by `config`.
    ///
    /// # Errors
    /// As [`LoggerBuilder::init`], plus [`LoggerError::InvalidConfiguration`] for an unknown
    /// level name.
    pub fn from_config(name: impl Into<String>, config: &LogConfig) -> Result<Self, LoggerError> {
        let mut builder = Self::builder(name).level(config.level_filter()?).console(config.console);
        if let Some(directives) = &config.filter {
            builder = builder.filter(directives.clone());
        }

        match &config.directory {
            Some(directory) => builder
                .directory(directory)
                .rotation(config.rotation)
                .max_files(config.max_files)
                .json(config.json)
                .init(),
            None => builder.init(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` when a rolling file layer is installed.
    #[must_use]
    pub const fn writes_files(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if self.guard.is_some() {
            tracing::info!(name = %self.name, "Logger shutting down, flushing file output");
        }
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

fn file_layer<S>(
    name: &str,
    rolling: &Rolling,
) -> Result<(BoxedLayer<S>, WorkerGuard), LoggerError>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + 'static,
{
    if rolling.max_files == 0 {
        return Err(LoggerError::invalid("max_files must be greater than zero"));
    }

    fs::create_dir_all(&rolling.directory)
        .context(format!("Failed to create log directory {}", rolling.directory.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(rolling.rotation.clone())
        .filename_prefix(name)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(rolling.max_files)
        .build(&rolling.directory)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let plain = layer().with_writer(writer).with_ansi(false);
    let boxed = if rolling.json { plain.json().boxed() } else { plain.boxed() };
    Ok((boxed, guard))
}

fn env_filter(level: LevelFilter, directives: Option<&str>) -> Result<EnvFilter, LoggerError> {
    let builder = EnvFilter::builder().with_default_directive(level.into());
    directives.map_or_else(
        || Ok(builder.from_env_lossy()),
        |directives| {
            builder.parse(directives).map_err(|e| {
                LoggerError::invalid(format!("Invalid filter '{directives}': {e}"))
            })
        },
    )
}
