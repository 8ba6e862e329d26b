//! The container: registration, lookups and orderly shutdown

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use burrow_common::Configuration;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::definition::{BeanDefinition, BeanId, ScopeKind, TypeKey};
use crate::error::{DIError, DIResult};
use crate::instance::{BeanInstance, Instance, Instances};
use crate::provider::{BeanProvider, ProviderRegistry};
use crate::registration::register_discovered_modules;
use crate::registry::Registry;
use crate::resolver::{Bound, Resolver};
use crate::scope::{ApplicationScope, DefaultScope, Scope};

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// Prune dead tracking entries once the list reaches a power of two past this
const TRACKING_PRUNE_THRESHOLD: usize = 256;

/// Lifecycle state of a [`Container`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    /// Accepting registrations
    Unstarted,
    /// Registry frozen, lookups allowed
    Started,
    /// Every instance released
    Closed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerState::Unstarted => "unstarted",
            ContainerState::Started => "started",
            ContainerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Container behaviour switches, read from the `container` configuration key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Create beans marked eager during `start()`
    pub eager_init: bool,
    /// Close the container and fail `start()` when an eager bean fails
    pub fail_fast_on_eager_error: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            eager_init: true,
            fail_fast_on_eager_error: true,
        }
    }
}

impl ContainerConfig {
    /// Read the `container` section, falling back to defaults when absent
    pub fn from_configuration(config: &Configuration) -> DIResult<Self> {
        Ok(config.get::<ContainerConfig>("container")?.unwrap_or_default())
    }
}

/// Everything a started container resolves against
pub(crate) struct Runtime {
    pub(crate) registry: Registry,
    pub(crate) application: ApplicationScope,
    pub(crate) default: DefaultScope,
    pub(crate) custom: HashMap<&'static str, Arc<dyn Scope>>,
}

/// Bean registry and scoped instance lifecycle manager
///
/// A container moves through [`ContainerState`] once: definitions are
/// registered while it is unstarted, [`start`](Self::start) freezes them,
/// lookups run while it is started and [`close`](Self::close) destroys every
/// live instance, latest created first.
pub struct Container {
    id: u64,
    config: ContainerConfig,
    state: RwLock<ContainerState>,
    pending: Mutex<Registry>,
    scopes: Mutex<HashMap<&'static str, Arc<dyn Scope>>>,
    runtime: OnceCell<Runtime>,
    created: Mutex<Vec<Weak<BeanInstance>>>,
    sequence: AtomicU64,
}

impl Container {
    /// Create an empty, unstarted container
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        Self {
            id: NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            state: RwLock::new(ContainerState::Unstarted),
            pending: Mutex::new(Registry::new()),
            scopes: Mutex::new(HashMap::new()),
            runtime: OnceCell::new(),
            created: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Start building a container
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn state(&self) -> ContainerState {
        *self.state.read()
    }

    /// Register a bean definition
    pub fn register(&self, definition: impl Into<BeanDefinition>) -> DIResult<BeanId> {
        let state = self.state.read();
        if *state != ContainerState::Unstarted {
            return Err(DIError::InvalidState {
                operation: "register a bean",
                state: *state,
            });
        }
        self.pending.lock().register(definition.into())
    }

    /// Register several definitions, stopping at the first failure
    pub fn register_all<I>(&self, definitions: I) -> DIResult<Vec<BeanId>>
    where
        I: IntoIterator,
        I::Item: Into<BeanDefinition>,
    {
        definitions.into_iter().map(|d| self.register(d)).collect()
    }

    /// Bind `ScopeKind::Custom(name)` to `scope`
    pub fn register_scope(&self, name: &'static str, scope: Arc<dyn Scope>) -> DIResult<()> {
        let state = self.state.read();
        if *state != ContainerState::Unstarted {
            return Err(DIError::InvalidState {
                operation: "register a scope",
                state: *state,
            });
        }
        debug!("Registered scope '{}'", name);
        self.scopes.lock().insert(name, scope);
        Ok(())
    }

    /// Freeze the registry and allow lookups. Beans marked eager are created
    /// now when [`ContainerConfig::eager_init`] is set.
    pub fn start(&self) -> DIResult<()> {
        {
            let mut state = self.state.write();
            if *state != ContainerState::Unstarted {
                return Err(DIError::InvalidState {
                    operation: "start",
                    state: *state,
                });
            }

            let mut registry = std::mem::take(&mut *self.pending.lock());
            registry.freeze();
            let custom = std::mem::take(&mut *self.scopes.lock());

            for definition in registry.definitions() {
                if let ScopeKind::Custom(name) = definition.scope() {
                    if !custom.contains_key(name) {
                        warn!(
                            "Bean {} uses scope '{}' which is not registered",
                            definition.display_name(),
                            name
                        );
                    }
                }
            }

            let runtime = Runtime {
                application: ApplicationScope::new(registry.len()),
                default: DefaultScope,
                custom,
                registry,
            };
            if self.runtime.set(runtime).is_err() {
                return Err(DIError::InvalidState {
                    operation: "start",
                    state: *state,
                });
            }
            *state = ContainerState::Started;
        }

        info!("Container started with {} bean(s)", self.bean_count());

        if self.config.eager_init {
            self.initialize_eager()?;
        }
        Ok(())
    }

    fn initialize_eager(&self) -> DIResult<()> {
        let resolver = self.resolver("initialize eager beans")?;
        let runtime = self.runtime("initialize eager beans")?;

        for definition in runtime.registry.definitions() {
            if !definition.is_eager() {
                continue;
            }
            if definition.scope() != ScopeKind::ApplicationScoped {
                debug!(
                    "Skipping eager flag of {} bean {}",
                    definition.scope(),
                    definition.display_name()
                );
                continue;
            }

            if let Err(e) = resolver.instantiate(definition) {
                if !self.config.fail_fast_on_eager_error {
                    warn!("Eager bean {} failed to start: {}", definition.display_name(), e);
                    continue;
                }
                warn!("Eager bean {} failed, closing container: {}", definition.display_name(), e);
                if let Err(close_error) = self.close() {
                    warn!("Closing after failed start also failed: {}", close_error);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn runtime(&self, operation: &'static str) -> DIResult<&Runtime> {
        let state = self.state();
        if state != ContainerState::Started {
            return Err(DIError::InvalidState { operation, state });
        }
        self.runtime.get().ok_or(DIError::InvalidState { operation, state })
    }

    fn resolver(&self, operation: &'static str) -> DIResult<Resolver<'_>> {
        Ok(Resolver::new(self, self.runtime(operation)?))
    }

    /// The highest-priority bean assignable to `T`
    pub fn lookup<T: ?Sized + 'static>(&self) -> DIResult<Instance<T>> {
        let bound = self.resolver("look up a bean")?.resolve_one(&TypeKey::of::<T>(), None)?;
        Instance::from_view(bound.handle, &bound.view)
    }

    /// The highest-priority bean assignable to `T` carrying `qualifier`
    pub fn lookup_qualified<T: ?Sized + 'static>(&self, qualifier: &str) -> DIResult<Instance<T>> {
        let bound = self
            .resolver("look up a bean")?
            .resolve_one(&TypeKey::of::<T>(), Some(qualifier))?;
        Instance::from_view(bound.handle, &bound.view)
    }

    /// Like [`lookup`](Self::lookup), but `None` when nothing is registered
    /// for `T`. Failures of a registered bean are still errors.
    pub fn try_lookup<T: ?Sized + 'static>(&self) -> DIResult<Option<Instance<T>>> {
        match self.resolver("look up a bean")?.resolve_optional(&TypeKey::of::<T>(), None)? {
            Some(bound) => Instance::from_view(bound.handle, &bound.view).map(Some),
            None => Ok(None),
        }
    }

    /// Every bean assignable to `T`, in priority then registration order.
    /// Each element is attempted; any failure fails the whole lookup.
    pub fn lookups<T: ?Sized + 'static>(&self) -> DIResult<Instances<T>> {
        let bound = self.resolver("look up beans")?.resolve_all(&TypeKey::of::<T>())?;
        let items = bound
            .into_iter()
            .map(|b| Instance::from_view(b.handle, &b.view))
            .collect::<DIResult<Vec<_>>>()?;
        Ok(Instances::new(items))
    }

    /// Every bean assignable to `T` that resolved, plus the failures of the
    /// ones that did not
    pub fn lookups_partial<T: ?Sized + 'static>(&self) -> DIResult<(Instances<T>, Vec<DIError>)> {
        let (bound, mut failures) = self.resolver("look up beans")?.resolve_all_partial(&TypeKey::of::<T>());
        let mut items = Vec::with_capacity(bound.len());
        for Bound { handle, view } in bound {
            match Instance::from_view(handle, &view) {
                Ok(instance) => items.push(instance),
                Err(e) => failures.push(e),
            }
        }
        Ok((Instances::new(items), failures))
    }

    /// Number of registered definitions
    pub fn bean_count(&self) -> usize {
        match self.runtime.get() {
            Some(runtime) => runtime.registry.len(),
            None => self.pending.lock().len(),
        }
    }

    /// Whether any definition is assignable to `T`
    pub fn is_registered<T: ?Sized + 'static>(&self) -> bool {
        let key = TypeKey::of::<T>();
        match self.runtime.get() {
            Some(runtime) => runtime.registry.contains(&key),
            None => self.pending.lock().contains(&key),
        }
    }

    /// Destroy every live instance, latest created first, then release every
    /// scope. All destroy hooks run even when some fail; the failures come
    /// back together as [`DIError::ShutdownFailed`]. Closing twice is a no-op.
    pub fn close(&self) -> DIResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                ContainerState::Closed => return Ok(()),
                ContainerState::Unstarted => {
                    return Err(DIError::InvalidState {
                        operation: "close",
                        state: ContainerState::Unstarted,
                    })
                }
                ContainerState::Started => *state = ContainerState::Closed,
            }
        }

        info!("Closing container");
        let mut live: Vec<Arc<BeanInstance>> = std::mem::take(&mut *self.created.lock())
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        live.sort_by_key(|instance| instance.sequence());

        let mut failures = Vec::new();
        for instance in live.iter().rev() {
            instance.destroy_into(&mut failures);
        }
        drop(live);

        if let Some(runtime) = self.runtime.get() {
            failures.extend(runtime.application.release());
            for (name, scope) in &runtime.custom {
                debug!("Releasing scope '{}'", name);
                failures.extend(scope.release());
            }
        }

        if failures.is_empty() {
            info!("Container closed");
        } else {
            warn!("Container closed with {} failure(s)", failures.len());
        }
        DIError::from_shutdown(failures)
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Remember `instance` so `close()` can destroy it
    pub(crate) fn track(&self, instance: &Arc<BeanInstance>) {
        let mut created = self.created.lock();
        if created.len() >= TRACKING_PRUNE_THRESHOLD && created.len().is_power_of_two() {
            created.retain(|weak| weak.strong_count() > 0);
        }
        created.push(Arc::downgrade(instance));
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("beans", &self.bean_count())
            .finish()
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.state() == ContainerState::Started {
            if let Err(e) = self.close() {
                warn!("Container dropped with shutdown failures: {}", e);
            }
        }
    }
}

/// Builder pattern for configuring a container
pub struct ContainerBuilder {
    container: Container,
    providers: ProviderRegistry,
    discover: bool,
}

impl ContainerBuilder {
    /// Create a new container builder
    pub fn new() -> Self {
        Self {
            container: Container::new(),
            providers: ProviderRegistry::new(),
            discover: false,
        }
    }

    /// Replace the container configuration
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.container.config = config;
        self
    }

    /// Register a bean definition
    pub fn register(self, definition: impl Into<BeanDefinition>) -> DIResult<Self> {
        self.container.register(definition)?;
        Ok(self)
    }

    /// Bind a custom scope name
    pub fn scope(self, name: &'static str, scope: impl Scope + 'static) -> DIResult<Self> {
        self.container.register_scope(name, Arc::new(scope))?;
        Ok(self)
    }

    /// Add a provider; providers register in priority order during `build()`
    pub fn provider(mut self, provider: impl BeanProvider + 'static) -> Self {
        self.providers.add(provider);
        self
    }

    /// Add a shared provider
    pub fn provider_arc(mut self, provider: Arc<dyn BeanProvider>) -> Self {
        self.providers.add_arc(provider);
        self
    }

    /// Also register every module submitted with `inventory::submit!`
    pub fn discover_modules(mut self) -> Self {
        self.discover = true;
        self
    }

    /// Build the container without starting it
    pub fn build(self) -> DIResult<Container> {
        if self.discover {
            let count = register_discovered_modules(&self.container)?;
            debug!("Registered {} discovered module(s)", count);
        }
        self.providers.register_all(&self.container)?;
        Ok(self.container)
    }

    /// Build and start the container
    pub fn start(self) -> DIResult<Container> {
        let container = self.build()?;
        container.start()?;
        Ok(container)
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
