//! Unified logging initialisation for burrow
//!
//! Every crate logs through the `tracing` macros. Binaries (or tests that
//! want output) call [`init`] once to install a fmt subscriber:
//! - minimum level from [`LogOptions`], overridden by `RUST_LOG` when set
//! - safe to call repeatedly; only the first call installs a subscriber

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::Configuration;

/// Log levels accepted in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Filter directive understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// A log level name that [`LogLevel::parse`] does not recognise
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown log level: {0}")]
pub struct ParseLogLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::parse(s).ok_or_else(|| ParseLogLevelError(s.to_string()))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Minimum log level
    pub level: LogLevel,
    /// Emit ANSI colours
    pub ansi: bool,
    /// Include the event target (module path)
    pub with_target: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            ansi: true,
            with_target: true,
        }
    }
}

impl LogOptions {
    /// Read `log.level`, `log.ansi` and `log.target` from configuration,
    /// falling back to defaults for anything missing or malformed.
    pub fn from_configuration(config: &Configuration) -> Self {
        let defaults = Self::default();
        Self {
            level: config
                .get_string("log.level")
                .and_then(|level| LogLevel::parse(&level))
                .unwrap_or(defaults.level),
            ansi: config.get_or("log.ansi", defaults.ansi).unwrap_or(defaults.ansi),
            with_target: config
                .get_or("log.target", defaults.with_target)
                .unwrap_or(defaults.with_target),
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
    }
}

/// Install the global fmt subscriber.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(options: LogOptions) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(options.filter())
        .with_ansi(options.ansi)
        .with_target(options.with_target)
        .try_init()
        .is_ok()
}
