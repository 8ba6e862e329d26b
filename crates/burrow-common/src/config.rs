//! Layered configuration
//!
//! Sources, lowest to highest precedence:
//! 1. an optional configuration file (format inferred from its extension)
//! 2. environment variables, e.g. `BURROW_CONTAINER__EAGER_INIT=false`
//!    for the key `container.eager_init`
//! 3. command-line pairs (`--key=value`, `--key value`, bare `--flag`)
//! 4. explicit overrides set on the builder

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Default environment variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "BURROW";

/// Configuration result type
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Read-only view over merged configuration sources
#[derive(Debug, Clone)]
pub struct Configuration {
    inner: Config,
}

impl Configuration {
    /// Start building a configuration
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    /// A configuration with no entries
    pub fn empty() -> Self {
        Self {
            inner: Config::default(),
        }
    }

    /// Typed access; `Ok(None)` when the key is absent
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get::<T>(key) {
            Ok(value) => Ok(Some(value)),
            Err(config::ConfigError::NotFound(_)) => Ok(None),
            Err(e) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Typed access with a fallback for absent keys
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Deserialize a whole table, e.g. `section::<ServerConfig>("server")`;
    /// an absent table yields `T::default()`
    pub fn section<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.get(key)?.unwrap_or_default())
    }

    /// String access; `None` when absent or not representable as a string
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.inner.get_string(key).ok()
    }

    /// Whether any source defines `key`
    pub fn contains(&self, key: &str) -> bool {
        self.inner.get::<config::Value>(key).is_ok()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builder collecting configuration sources
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    file: Option<PathBuf>,
    env_prefix: Option<String>,
    overrides: Vec<(String, String)>,
}

impl ConfigurationBuilder {
    /// Create a builder with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an optional configuration file; a missing file is not an error
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read environment variables starting with `prefix`
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Read `--key=value` / `--key value` / `--flag` pairs; positional
    /// arguments are ignored
    pub fn args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.overrides.extend(parse_args(args));
        self
    }

    /// Set a single value, overriding every other source
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Merge all sources
    pub fn build(self) -> Result<Configuration> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            debug!("Loading configuration file {}", path.display());
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }

        if let Some(prefix) = &self.env_prefix {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        for (key, value) in self.overrides {
            builder = builder.set_override(key, value)?;
        }

        Ok(Configuration {
            inner: builder.build()?,
        })
    }
}

fn parse_args<S: AsRef<str>>(args: &[S]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut iter = args.iter().map(AsRef::as_ref).peekable();

    while let Some(arg) = iter.next() {
        let Some(option) = arg.strip_prefix("--") else {
            continue;
        };
        if option.is_empty() {
            // `--` ends option parsing
            break;
        }

        match option.split_once('=') {
            Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
            None => {
                let value = match iter.peek() {
                    Some(next) if !next.starts_with("--") => iter.next().unwrap_or_default(),
                    _ => "true",
                };
                pairs.push((option.to_string(), value.to_string()));
            }
        }
    }

    pairs
}
