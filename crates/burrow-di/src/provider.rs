//! Bean providers
//!
//! A provider groups the bean definitions of one subsystem behind a single
//! registration call, so an application assembles its container from a list
//! of providers instead of from individual definitions.
//!
//! ```rust,ignore
//! use burrow_di::{BeanDefinition, BeanProvider, Container, DIResult};
//! use std::sync::Arc;
//!
//! pub struct RpcProvider;
//!
//! impl BeanProvider for RpcProvider {
//!     fn name(&self) -> &'static str {
//!         "rpc"
//!     }
//!
//!     fn register(&self, container: &Container) -> DIResult<()> {
//!         container.register(BeanDefinition::provided(Arc::new(MethodTable::default())))?;
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::container::Container;
use crate::error::DIResult;

/// Registers the beans of one subsystem
pub trait BeanProvider: Send + Sync {
    /// Used in logs and diagnostics
    fn name(&self) -> &'static str;

    /// Lower values register first. Default is 100.
    ///
    /// This orders registration calls only; lookup order among beans of the
    /// same type is decided by each definition's own priority.
    fn priority(&self) -> u32 {
        100
    }

    /// Add this provider's definitions to the (unstarted) container
    fn register(&self, container: &Container) -> DIResult<()>;

    /// Check that what this provider needs from other providers is present.
    ///
    /// Called once every provider has registered.
    #[allow(unused_variables)]
    fn validate(&self, container: &Container) -> DIResult<()> {
        Ok(())
    }
}

/// Ordered set of providers
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn BeanProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn add<P: BeanProvider + 'static>(&mut self, provider: P) -> &mut Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn add_arc(&mut self, provider: Arc<dyn BeanProvider>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider names in the order they were added
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Run every provider in ascending priority order (insertion order for
    /// ties), then validate each of them
    pub fn register_all(&self, container: &Container) -> DIResult<()> {
        if self.providers.is_empty() {
            return Ok(());
        }

        let mut sorted: Vec<_> = self.providers.iter().collect();
        sorted.sort_by_key(|p| p.priority());

        info!("Registering {} bean provider(s)", sorted.len());
        for provider in &sorted {
            debug!(
                "Registering provider '{}' (priority: {})",
                provider.name(),
                provider.priority()
            );
            provider.register(container)?;
        }

        for provider in &sorted {
            provider.validate(container)?;
        }
        Ok(())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
