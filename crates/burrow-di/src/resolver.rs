//! Dependency graph resolution
//!
//! Resolution is depth-first: a bean's declared dependencies are resolved
//! before its scope is asked for an instance, so a scope only holds its
//! creation lock while factories themselves run. Every definition
//! being resolved on the current thread sits on a thread-local stack; meeting
//! one again is reported as a [`DIError::CircularDependency`] naming the
//! whole cycle instead of recursing until the stack overflows.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::debug;

use crate::container::{Container, Runtime};
use crate::context::BeanContext;
use crate::definition::{BeanDefinition, BeanId, Cardinality, Dependency, Erased, ScopeKind, TypeKey};
use crate::error::{DIError, DIResult};
use crate::instance::{release_unused, BeanInstance};
use crate::registry::Candidate;
use crate::scope::Scope;

struct StackEntry {
    container: u64,
    bean: BeanId,
    name: String,
}

thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<StackEntry>> = const { RefCell::new(Vec::new()) };
}

/// Marks a definition as "being resolved" on this thread until dropped
pub(crate) struct CycleGuard {
    _private: (),
}

impl CycleGuard {
    pub(crate) fn enter(container: u64, definition: &BeanDefinition) -> DIResult<Self> {
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let seen = stack
                .iter()
                .position(|entry| entry.container == container && entry.bean == definition.id());

            if let Some(start) = seen {
                let mut cycle: Vec<String> = stack[start..].iter().map(|entry| entry.name.clone()).collect();
                cycle.push(definition.display_name());
                return Err(DIError::CircularDependency { cycle });
            }

            stack.push(StackEntry {
                container,
                bean: definition.id(),
                name: definition.display_name(),
            });
            Ok(CycleGuard { _private: () })
        })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        RESOLUTION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Number of definitions currently being resolved on this thread
#[cfg(test)]
pub(crate) fn resolution_depth() -> usize {
    RESOLUTION_STACK.with(|stack| stack.borrow().len())
}

/// A resolved bean together with its value converted to the requested type
pub(crate) struct Bound {
    pub(crate) handle: Arc<BeanInstance>,
    pub(crate) view: Erased,
}

/// Resolution result of one declared dependency
pub(crate) enum Resolved {
    One(Bound),
    Absent,
    All(Vec<Bound>),
}

impl Resolved {
    fn handles(&self) -> Vec<Arc<BeanInstance>> {
        match self {
            Resolved::One(bound) => vec![Arc::clone(&bound.handle)],
            Resolved::Absent => Vec::new(),
            Resolved::All(bound) => bound.iter().map(|b| Arc::clone(&b.handle)).collect(),
        }
    }
}

fn release_resolved(resolved: Vec<Resolved>) {
    release_unused(resolved.iter().flat_map(Resolved::handles));
}

fn release_bound(bound: Vec<Bound>) {
    release_unused(bound.into_iter().map(|b| b.handle));
}

/// Resolves requests against a started container
pub(crate) struct Resolver<'c> {
    container: &'c Container,
    runtime: &'c Runtime,
}

impl<'c> Resolver<'c> {
    pub(crate) fn new(container: &'c Container, runtime: &'c Runtime) -> Self {
        Self { container, runtime }
    }

    pub(crate) fn container(&self) -> &'c Container {
        self.container
    }

    fn scope_for(&self, definition: &BeanDefinition) -> DIResult<&'c dyn Scope> {
        match definition.scope() {
            ScopeKind::ApplicationScoped => Ok(&self.runtime.application),
            ScopeKind::DefaultScoped => Ok(&self.runtime.default),
            ScopeKind::Custom(name) => self
                .runtime
                .custom
                .get(name)
                .map(|scope| scope.as_ref())
                .ok_or_else(|| DIError::UnknownScope {
                    bean: definition.display_name(),
                    scope: name.to_string(),
                }),
        }
    }

    /// Single lookup: highest-priority candidate, `NotFound` if none
    pub(crate) fn resolve_one(&self, key: &TypeKey, qualifier: Option<&str>) -> DIResult<Bound> {
        let candidate = self
            .runtime
            .registry
            .candidate(key, qualifier)
            .ok_or_else(|| DIError::not_found(key, qualifier))?;
        self.resolve_candidate(key, candidate)
    }

    /// Like [`resolve_one`](Self::resolve_one), but absent when nothing is
    /// registered. Failures of a registered candidate still propagate.
    pub(crate) fn resolve_optional(&self, key: &TypeKey, qualifier: Option<&str>) -> DIResult<Option<Bound>> {
        match self.runtime.registry.candidate(key, qualifier) {
            Some(candidate) => self.resolve_candidate(key, candidate).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve every candidate independently, collecting failures
    pub(crate) fn resolve_all_partial(&self, key: &TypeKey) -> (Vec<Bound>, Vec<DIError>) {
        let mut bound = Vec::new();
        let mut failures = Vec::new();
        for candidate in self.runtime.registry.candidates(key) {
            match self.resolve_candidate(key, candidate) {
                Ok(b) => bound.push(b),
                Err(e) => failures.push(e),
            }
        }
        (bound, failures)
    }

    /// Resolve every candidate; any failure fails the whole collection once
    /// all elements have been attempted
    pub(crate) fn resolve_all(&self, key: &TypeKey) -> DIResult<Vec<Bound>> {
        let (bound, failures) = self.resolve_all_partial(key);
        if failures.is_empty() {
            Ok(bound)
        } else {
            release_bound(bound);
            Err(DIError::from_lookups(key, failures))
        }
    }

    fn resolve_candidate(&self, key: &TypeKey, candidate: &Candidate) -> DIResult<Bound> {
        let handle = self.instantiate(&candidate.definition)?;
        let view = candidate
            .definition
            .views()
            .get(candidate.view)
            .and_then(|view| view.cast(handle.value()));

        match view {
            Some(view) => Ok(Bound { handle, view }),
            None => {
                release_unused(std::iter::once(handle));
                Err(DIError::type_mismatch(key.name()))
            }
        }
    }

    /// Obtain the instance of `definition` from its scope, creating it (and
    /// its dependencies) when the scope has none to reuse
    pub(crate) fn instantiate(&self, definition: &Arc<BeanDefinition>) -> DIResult<Arc<BeanInstance>> {
        let scope = self.scope_for(definition)?;
        let _guard = CycleGuard::enter(self.container.id(), definition)?;

        if let Some(existing) = scope.cached(definition) {
            return Ok(existing);
        }

        let mut pending = Some(self.resolve_dependencies(definition)?);
        let result = scope.get_or_create(definition, &mut || {
            let dependencies = match pending.take() {
                Some(dependencies) => dependencies,
                None => self.resolve_dependencies(definition)?,
            };
            self.create(definition, dependencies)
        });

        // The scope reused an instance created elsewhere
        if let Some(unused) = pending {
            release_resolved(unused);
        }
        result
    }

    fn resolve_dependencies(&self, definition: &BeanDefinition) -> DIResult<Vec<Resolved>> {
        let mut resolved = Vec::with_capacity(definition.dependencies().len());
        for dependency in definition.dependencies() {
            match self.resolve_dependency(dependency) {
                Ok(r) => resolved.push(r),
                Err(e) => {
                    release_resolved(resolved);
                    return Err(e);
                }
            }
        }
        Ok(resolved)
    }

    fn resolve_dependency(&self, dependency: &Dependency) -> DIResult<Resolved> {
        let key = dependency.key();
        match dependency.cardinality() {
            Cardinality::One => self.resolve_one(key, dependency.qualifier()).map(Resolved::One),
            Cardinality::Optional => Ok(self
                .resolve_optional(key, dependency.qualifier())?
                .map_or(Resolved::Absent, Resolved::One)),
            Cardinality::All => self.resolve_all(key).map(Resolved::All),
        }
    }

    fn create(&self, definition: &Arc<BeanDefinition>, dependencies: Vec<Resolved>) -> DIResult<Arc<BeanInstance>> {
        let mut ctx = BeanContext::new(self, definition, &dependencies);
        let produced = definition.create(&mut ctx);
        let collected = ctx.into_collected();

        let mut handles: Vec<Arc<BeanInstance>> = dependencies.iter().flat_map(Resolved::handles).collect();
        handles.extend(collected);

        let value = match produced.and_then(|value| definition.run_init(&value).map(|()| value)) {
            Ok(value) => value,
            Err(e) => {
                release_unused(handles);
                return Err(DIError::from_factory(definition, e));
            }
        };

        let owned = handles
            .iter()
            .filter(|handle| handle.definition().scope() == ScopeKind::DefaultScoped)
            .cloned()
            .collect();
        let instance = Arc::new(BeanInstance::new(
            self.container.next_sequence(),
            Arc::clone(definition),
            value,
            owned,
        ));
        for handle in &handles {
            handle.add_dependent(&instance);
        }
        self.container.track(&instance);

        debug!(
            "Created bean {} (scope: {}, sequence: {})",
            definition.display_name(),
            definition.scope(),
            instance.sequence()
        );
        Ok(instance)
    }
}
