//! Bean registry and scoped instance lifecycle manager for Burrow
//!
//! Components ("beans") are described by [`BeanDefinition`]s: a public type,
//! a scope, a priority, the dependencies the factory needs and optional
//! lifecycle hooks. A [`Container`] indexes the definitions, resolves
//! dependency graphs on lookup, caches instances per scope and tears them
//! down in reverse creation order on [`Container::close`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use burrow_di::{BeanDefinition, Container};
//!
//! struct Repository;
//!
//! struct Service {
//!     repository: Arc<Repository>,
//! }
//!
//! let container = Container::new();
//! container.register(BeanDefinition::builder(|_| Ok(Arc::new(Repository))).application_scoped())?;
//! container.register(
//!     BeanDefinition::builder(|ctx| {
//!         Ok(Arc::new(Service {
//!             repository: ctx.get::<Repository>()?,
//!         }))
//!     })
//!     .depends_on::<Repository>(),
//! )?;
//!
//! container.start()?;
//! let service = container.lookup::<Service>()?;
//! assert!(Arc::ptr_eq(&service.repository, &container.lookup::<Repository>()?.value()));
//! drop(service);
//! container.close()?;
//! # Ok::<(), burrow_di::DIError>(())
//! ```
//!
//! Beans can be looked up as any type they [`expose`](BeanDefinitionBuilder::expose),
//! which is how collection lookups such as "every `dyn Awaiter`" are built.

pub mod container;
pub mod context;
pub mod definition;
pub mod error;
pub mod instance;
pub mod launcher;
pub mod provider;
pub mod registration;
pub mod registry;
mod resolver;
pub mod scope;

pub use container::{Container, ContainerBuilder, ContainerConfig, ContainerState};
pub use context::BeanContext;
pub use definition::{
    BeanDefinition, BeanDefinitionBuilder, BeanId, Cardinality, Dependency, ScopeKind, TypeKey, DEFAULT_PRIORITY,
};
pub use error::{DIError, DIResult};
pub use instance::{BeanInstance, Instance, Instances};
pub use launcher::{Args, Awaiter, Launcher};
pub use provider::{BeanProvider, ProviderRegistry};
pub use registration::{discovered_module_count, list_discovered_modules, register_discovered_modules, BeanModule};
pub use registry::Registry;
pub use scope::{ApplicationScope, Creator, DefaultScope, Scope};

// Re-exported so modules can be submitted without a direct dependency
pub use inventory;
