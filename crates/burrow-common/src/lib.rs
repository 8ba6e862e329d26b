//! Shared utilities for burrow crates
//!
//! - [`logging`]: `tracing` subscriber initialisation
//! - [`config`]: layered configuration (file, environment, command line)

pub mod config;
pub mod logging;

pub use config::{ConfigError, Configuration, ConfigurationBuilder, Result};
pub use logging::{LogLevel, LogOptions, ParseLogLevelError};
