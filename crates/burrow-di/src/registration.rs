//! Declarative bean modules collected at link time
//!
//! Any crate linked into the binary can contribute definitions without the
//! application naming it: submit a [`BeanModule`] with `inventory::submit!`
//! and every module is run when the container is built with
//! [`ContainerBuilder::discover_modules`](crate::ContainerBuilder::discover_modules).
//!
//! ```rust,ignore
//! use burrow_di::{BeanDefinition, BeanModule};
//! use std::sync::Arc;
//!
//! inventory::submit! {
//!     BeanModule::new("jsonrpc", |container| {
//!         container.register(BeanDefinition::provided(Arc::new(MethodTable::default())))?;
//!         Ok(())
//!     })
//! }
//! ```

use tracing::{debug, info};

use crate::container::Container;
use crate::error::DIResult;

/// A named group of registrations discovered through `inventory`
pub struct BeanModule {
    /// Used in logs, e.g. "jsonrpc" or "cli"
    pub name: &'static str,

    /// Registers the module's definitions
    pub register_fn: fn(&Container) -> DIResult<()>,

    /// Lower runs earlier; default 100
    pub priority: u32,
}

impl BeanModule {
    pub const fn new(name: &'static str, register_fn: fn(&Container) -> DIResult<()>) -> Self {
        Self::with_priority(name, register_fn, 100)
    }

    pub const fn with_priority(
        name: &'static str,
        register_fn: fn(&Container) -> DIResult<()>,
        priority: u32,
    ) -> Self {
        Self {
            name,
            register_fn,
            priority,
        }
    }
}

inventory::collect!(BeanModule);

/// Run every submitted module against `container` in ascending priority
/// order, returning how many ran
pub fn register_discovered_modules(container: &Container) -> DIResult<usize> {
    let mut modules: Vec<&BeanModule> = inventory::iter::<BeanModule>().collect();
    // Submission order is unspecified across crates; sort by name within a priority
    modules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(b.name)));

    info!("Discovered {} bean module(s)", modules.len());
    for module in &modules {
        debug!("Registering module '{}' (priority: {})", module.name, module.priority);
        (module.register_fn)(container)?;
    }
    Ok(modules.len())
}

pub fn discovered_module_count() -> usize {
    inventory::iter::<BeanModule>().count()
}

pub fn list_discovered_modules() -> Vec<&'static str> {
    inventory::iter::<BeanModule>().map(|m| m.name).collect()
}
