//! Tracing subscriber setup.
//!
//! The SDK only emits `tracing` events under the `account_session` and
//! `account_common` targets. Host applications that do not bring their own
//! subscriber can call [`init_tracing`] once at startup; the SDK targets can
//! be tuned independently of the host's default level.

use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{self, TestWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Targets the SDK crates log under.
pub const SDK_TARGETS: [&str; 2] = ["account_session", "account_common"];

/// Invalid logging configuration.
#[derive(Debug, Error)]
#[error("Invalid {name}: {value:?}")]
pub struct TracingConfigError {
    /// Variable or field that failed to parse
    pub name: &'static str,
    /// Rejected value
    pub value: String,
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Compact,
    /// Multi-line human readable output
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = TracingConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(TracingConfigError {
                name: "log format",
                value: s.to_string(),
            }),
        }
    }
}

/// Where formatted events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogWriter {
    /// Standard error
    #[default]
    Stderr,
    /// The test harness capture, so output only shows for failing tests
    Test,
}

/// Tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Default filter for every target, used when `RUST_LOG` is unset
    pub default_level: String,
    /// Level override for the SDK targets
    pub sdk_level: Option<String>,
    /// Output format
    pub format: LogFormat,
    /// Output sink
    pub writer: LogWriter,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            sdk_level: None,
            format: LogFormat::default(),
            writer: LogWriter::default(),
        }
    }
}

impl TracingConfig {
    /// Configuration for test binaries: quiet host, verbose SDK, captured output.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            default_level: "warn".to_string(),
            sdk_level: Some("debug".to_string()),
            format: LogFormat::Compact,
            writer: LogWriter::Test,
        }
    }

    /// Load from `ACCOUNT_LOG_LEVEL`, `ACCOUNT_SDK_LOG_LEVEL` and
    /// `ACCOUNT_LOG_FORMAT`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown format or an unparsable level.
    pub fn from_env() -> Result<Self, TracingConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TracingConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = lookup("ACCOUNT_LOG_LEVEL") {
            config.default_level = level;
        }
        config.sdk_level = lookup("ACCOUNT_SDK_LOG_LEVEL");
        if let Some(format) = lookup("ACCOUNT_LOG_FORMAT") {
            config.format = format.parse()?;
        }

        config.filter()?;
        Ok(config)
    }

    /// Set the default level.
    #[must_use]
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Override the level of the SDK targets.
    #[must_use]
    pub fn with_sdk_level(mut self, level: impl Into<String>) -> Self {
        self.sdk_level = Some(level.into());
        self
    }

    /// Set the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// `EnvFilter` directives: the default level, then one per SDK target.
    #[must_use]
    pub fn filter_directives(&self) -> String {
        let mut directives = self.default_level.clone();
        if let Some(level) = &self.sdk_level {
            for target in SDK_TARGETS {
                directives.push_str(&format!(",{target}={level}"));
            }
        }
        directives
    }

    fn filter(&self) -> Result<EnvFilter, TracingConfigError> {
        EnvFilter::try_new(self.filter_directives()).map_err(|_| TracingConfigError {
            name: "log level",
            value: self.filter_directives(),
        })
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let (writer, ansi) = match self.writer {
            LogWriter::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
            LogWriter::Test => (BoxMakeWriter::new(TestWriter::new()), false),
        };
        let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
        match self.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured levels. Returns `false`
/// when a global subscriber was already installed.
pub fn init_tracing(config: &TracingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| config.filter())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(config.layer())
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(directives = %config.filter_directives(), "Tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.filter_directives(), "info");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.writer, LogWriter::Stderr);
    }

    #[test]
    fn test_sdk_level_scopes_sdk_targets() {
        let config = TracingConfig::default()
            .with_default_level("warn")
            .with_sdk_level("trace");

        assert_eq!(
            config.filter_directives(),
            "warn,account_session=trace,account_common=trace"
        );
    }

    #[test]
    fn test_from_lookup() {
        let config = TracingConfig::from_lookup(lookup(&[
            ("ACCOUNT_LOG_LEVEL", "error"),
            ("ACCOUNT_SDK_LOG_LEVEL", "debug"),
            ("ACCOUNT_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.default_level, "error");
        assert_eq!(config.sdk_level.as_deref(), Some("debug"));
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = TracingConfig::from_lookup(lookup(&[("ACCOUNT_LOG_FORMAT", "xml")])).unwrap_err();
        assert_eq!(err.name, "log format");

        let err = TracingConfig::from_lookup(lookup(&[("ACCOUNT_SDK_LOG_LEVEL", "loud")])).unwrap_err();
        assert_eq!(err.name, "log level");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = TracingConfig::for_tests();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
