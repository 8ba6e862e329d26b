//! Process entry point
//!
//! The [`Launcher`] merges the [`Configuration`] and initialises logging
//! from it. It then builds a container from the application's definitions,
//! providers and discovered modules, adds the process [`Args`] and the
//! configuration as beans, starts it and awaits every [`Awaiter`] bean in
//! priority order. The container is closed on every exit path.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use burrow_common::config::DEFAULT_ENV_PREFIX;
use burrow_common::logging::{self, LogOptions};
use burrow_common::Configuration;
use tracing::{debug, info, warn};

use crate::container::{Container, ContainerConfig};
use crate::definition::{BeanDefinition, ScopeKind};
use crate::error::{DIError, DIResult};
use crate::provider::BeanProvider;

/// A bean that keeps the process alive until its work completes, such as a
/// server waiting for shutdown or a CLI command running to completion
#[async_trait]
pub trait Awaiter: Send + Sync {
    async fn await_completion(&self) -> anyhow::Result<()>;
}

/// Command-line arguments of the process, program name excluded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args(Vec<String>);

impl Args {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Arguments that are not `--options` (nor option values), in order
    pub fn positional(&self) -> Vec<&str> {
        let mut positional = Vec::new();
        let mut iter = self.0.iter().map(String::as_str).peekable();
        while let Some(arg) = iter.next() {
            match arg.strip_prefix("--") {
                Some("") => {
                    positional.extend(iter);
                    break;
                }
                Some(option) if !option.contains('=') => {
                    // Consume the option's value, if it has one
                    if iter.peek().is_some_and(|next| !next.starts_with("--")) {
                        iter.next();
                    }
                }
                Some(_) => {}
                None => positional.push(arg),
            }
        }
        positional
    }
}

/// Builds, runs and closes the application container
pub struct Launcher {
    args: Args,
    definitions: Vec<BeanDefinition>,
    providers: Vec<Arc<dyn BeanProvider>>,
    discover: bool,
    config_file: Option<PathBuf>,
    env_prefix: String,
}

impl Launcher {
    pub fn new(args: Args) -> Self {
        Self {
            args,
            definitions: Vec::new(),
            providers: Vec::new(),
            discover: true,
            config_file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// A launcher for the arguments of the running process
    pub fn from_env() -> Self {
        Self::new(Args::new(std::env::args().skip(1)))
    }

    pub fn with_definition(mut self, definition: impl Into<BeanDefinition>) -> Self {
        self.definitions.push(definition.into());
        self
    }

    pub fn with_provider(mut self, provider: impl BeanProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Skip modules submitted with `inventory::submit!`
    pub fn without_discovery(mut self) -> Self {
        self.discover = false;
        self
    }

    /// Read an optional configuration file below env and args
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    fn configuration(&self) -> DIResult<Configuration> {
        let mut builder = Configuration::builder().env_prefix(&self.env_prefix);
        if let Some(path) = &self.config_file {
            builder = builder.file(path);
        }
        Ok(builder.args(self.args.as_slice()).build()?)
    }

    /// Build and start the container without awaiting anything. Logging is
    /// initialised from the `log` section unless a subscriber is already set.
    pub fn start(self) -> DIResult<Container> {
        let configuration = self.configuration()?;
        if !logging::init(LogOptions::from_configuration(&configuration)) {
            debug!("Global subscriber already installed, keeping it");
        }
        let mut builder = Container::builder().config(ContainerConfig::from_configuration(&configuration)?);

        if self.discover {
            builder = builder.discover_modules();
        }
        for provider in self.providers {
            builder = builder.provider_arc(provider);
        }
        for definition in self.definitions {
            builder = builder.register(definition)?;
        }

        let args = self.args;
        builder
            .register(BeanDefinition::supplier(ScopeKind::DefaultScoped, move || {
                Ok(Arc::new(args.clone()))
            }))?
            .register(BeanDefinition::provided(Arc::new(configuration)))?
            .start()
    }

    /// Start the container, await every [`Awaiter`] in order and close it
    pub async fn run(self) -> DIResult<()> {
        let container = self.start()?;
        let awaited = await_all(&container).await;
        let closed = container.close();

        match (awaited, closed) {
            (Ok(()), closed) => closed,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_error)) => {
                warn!("Container close after failed run also failed: {}", close_error);
                Err(e)
            }
        }
    }

    /// Blocking entry point for `main`: runs [`run`](Self::run) on a fresh
    /// multi-threaded tokio runtime
    pub fn launch(self) -> DIResult<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        runtime.block_on(self.run())
    }
}

async fn await_all(container: &Container) -> DIResult<()> {
    let awaiters = container.lookups::<dyn Awaiter>()?;
    info!("Awaiting {} awaiter(s)", awaiters.len());

    for awaiter in &awaiters {
        let bean = awaiter
            .definition()
            .map(BeanDefinition::display_name)
            .unwrap_or_default();
        awaiter
            .await_completion()
            .await
            .map_err(|source| DIError::AwaitFailed { bean, source })?;
    }
    awaiters.release()
}
