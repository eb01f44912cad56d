//! Structured logging setup.
//!
//! One `tracing-subscriber` fmt layer is installed per process. `RUST_LOG`
//! takes precedence over the configured level; extra directives are appended
//! so chatty dependencies can be quietened.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::subscriber::DefaultGuard;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Directives applied when no explicit filter is configured
pub const DEFAULT_DIRECTIVES: &str = "hyper=warn,reqwest=warn,tower_http=info";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Include timestamps
    pub timestamps: bool,
    /// Include source file and line
    pub include_location: bool,
    /// Extra filter directives (e.g., "hyper=warn")
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Pretty,
            timestamps: true,
            include_location: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable JSON format
    #[must_use]
    pub fn json(self) -> Self {
        self.with_format(LogFormat::Json)
    }

    /// Set filter directives
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Get the tracing Level
    #[must_use]
    pub fn tracing_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Filter directives derived from this configuration
    #[must_use]
    pub fn directives(&self) -> String {
        let extra = self.filter.as_deref().unwrap_or(DEFAULT_DIRECTIVES);
        let level = self.tracing_level().to_string().to_lowercase();
        if extra.is_empty() {
            level
        } else {
            format!("{level},{extra}")
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (structured)
    Json,
    /// Pretty format (human-readable)
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

/// Initialize logging with the given configuration
///
/// # Errors
/// Returns error if the filter does not parse or a global subscriber is
/// already installed
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    if !config.enabled {
        return Ok(());
    }

    let filter = build_filter(config)?;
    tracing_subscriber::registry()
        .with(build_layer(config).with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

/// Install a thread-local stderr subscriber for the startup phase
///
/// Events emitted while the configuration is being loaded, before
/// [`init_logging`] can run, go to this subscriber. It honours `RUST_LOG` and
/// falls back to `info`. Dropping the guard uninstalls it.
#[must_use = "the bootstrap subscriber is removed when the guard is dropped"]
pub fn bootstrap_logging() -> DefaultGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing::subscriber::set_default(bootstrap_subscriber(filter, std::io::stderr))
}

fn bootstrap_subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt()
        .compact()
        .with_target(true)
        .with_env_filter(filter)
        .with_writer(writer)
        .finish()
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(config.directives()).map_err(|e| LoggingError::FilterParse(e.to_string()))
}

fn build_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = fmt::layer()
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_target(true);

    match (config.format, config.timestamps) {
        // JSON always carries timestamps
        (LogFormat::Json, _) => base.json().boxed(),
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    Init(String),
    /// Failed to parse filter
    #[error("Failed to parse log filter: {0}")]
    FilterParse(String),
    /// Unknown output format
    #[error("Unknown log format: {0}")]
    UnknownFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LoggingConfig::new()
            .with_level("debug")
            .json()
            .with_filter("hyper=warn");

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.directives(), "debug,hyper=warn");
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(LoggingConfig::default().directives(), format!("info,{DEFAULT_DIRECTIVES}"));
        assert_eq!(LoggingConfig::new().with_filter("").directives(), "info");
    }

    #[test]
    fn test_tracing_level() {
        assert_eq!(LoggingConfig::new().with_level("trace").tracing_level(), Level::TRACE);
        assert_eq!(LoggingConfig::new().with_level("WARNING").tracing_level(), Level::WARN);
        assert_eq!(LoggingConfig::new().with_level("invalid").tracing_level(), Level::INFO);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_bootstrap_subscriber_keeps_startup_events() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = bootstrap_subscriber(EnvFilter::new("info"), move || writer.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("No configuration file found, using defaults");
            tracing::debug!("Loaded .env file");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("No configuration file found, using defaults"));
        assert!(!output.contains("Loaded .env file"));
    }

    #[test]
    fn test_bootstrap_guard_is_scoped() {
        let guard = bootstrap_logging();
        assert!(tracing::dispatcher::has_been_set());
        drop(guard);
    }

    #[test]
    fn test_disabled_logging_is_noop() {
        let config = LoggingConfig {
            enabled: false,
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
