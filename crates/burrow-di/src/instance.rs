//! Created bean instances and their teardown
//!
//! [`BeanInstance`] is the type-erased handle owned by a scope (or, for
//! default-scoped dependencies, by the bean they were created for). It
//! remembers which instances were built on top of it so that destroying it
//! always destroys those dependents first.
//!
//! [`Instance`] is what lookups hand out: a typed view over a handle.
//! Dropping or releasing an `Instance` of a default-scoped bean destroys it;
//! instances of other scopes belong to their scope.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::definition::{BeanDefinition, Erased, ScopeKind};
use crate::error::{DIError, DIResult};

/// Prune dead weak references once a list grows past this many entries
const PRUNE_THRESHOLD: usize = 64;

/// A live, type-erased bean instance
pub struct BeanInstance {
    sequence: u64,
    definition: Arc<BeanDefinition>,
    value: Erased,
    destroyed: AtomicBool,
    dependents: Mutex<Vec<Weak<BeanInstance>>>,
    owned: Mutex<Vec<Arc<BeanInstance>>>,
}

impl BeanInstance {
    pub(crate) fn new(
        sequence: u64,
        definition: Arc<BeanDefinition>,
        value: Erased,
        owned: Vec<Arc<BeanInstance>>,
    ) -> Self {
        Self {
            sequence,
            definition,
            value,
            destroyed: AtomicBool::new(false),
            dependents: Mutex::new(Vec::new()),
            owned: Mutex::new(owned),
        }
    }

    /// Position in the container's creation order
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn definition(&self) -> &BeanDefinition {
        &self.definition
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn value(&self) -> &Erased {
        &self.value
    }

    /// Record that `dependent` was created using this instance
    pub(crate) fn add_dependent(&self, dependent: &Arc<BeanInstance>) {
        let mut dependents = self.dependents.lock();
        if dependents.len() >= PRUNE_THRESHOLD && dependents.len().is_power_of_two() {
            dependents.retain(|d| d.strong_count() > 0);
        }
        dependents.push(Arc::downgrade(dependent));
    }

    /// Destroy this instance: live dependents first, then the destroy hook,
    /// then the default-scoped dependencies created for it. Runs at most
    /// once; later calls return no failures.
    pub fn destroy(&self) -> Vec<DIError> {
        let mut failures = Vec::new();
        self.destroy_into(&mut failures);
        failures
    }

    pub(crate) fn destroy_into(&self, failures: &mut Vec<DIError>) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let dependents = std::mem::take(&mut *self.dependents.lock());
        for dependent in dependents.iter().rev().filter_map(Weak::upgrade) {
            dependent.destroy_into(failures);
        }

        if self.definition.has_destroy_hook() {
            debug!("Destroying bean {}", self.definition.display_name());
            if let Err(source) = self.definition.run_destroy(&self.value) {
                let bean = self.definition.display_name();
                warn!("Destroy hook of bean {} failed: {:#}", bean, source);
                failures.push(DIError::DestroyFailed { bean, source });
            }
        }

        let owned = std::mem::take(&mut *self.owned.lock());
        for dependency in owned.iter().rev() {
            dependency.destroy_into(failures);
        }
    }
}

impl fmt::Debug for BeanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanInstance")
            .field("bean", &self.definition.display_name())
            .field("sequence", &self.sequence)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Release a handle on behalf of its holder. Only default-scoped instances
/// are destroyed; every other scope owns its instances.
pub(crate) fn release_handle(handle: &BeanInstance) -> DIResult<()> {
    if handle.definition().scope() != ScopeKind::DefaultScoped {
        return Ok(());
    }
    let mut failures = handle.destroy();
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(DIError::ShutdownFailed { failures }),
    }
}

/// Release handles that were resolved but never handed to anyone,
/// logging failures instead of returning them
pub(crate) fn release_unused(handles: impl IntoIterator<Item = Arc<BeanInstance>>) {
    for handle in handles {
        if let Err(e) = release_handle(&handle) {
            warn!("Failed to release unused bean {}: {}", handle.definition().display_name(), e);
        }
    }
}

/// A bean obtained from a lookup
///
/// Derefs to the bean value. For default-scoped beans the caller owns the
/// instance: [`release`](Self::release) it, or let it drop, when done.
pub struct Instance<T: ?Sized> {
    value: Arc<T>,
    handle: Option<Arc<BeanInstance>>,
}

impl<T: ?Sized + 'static> Instance<T> {
    pub(crate) fn from_view(handle: Arc<BeanInstance>, view: &Erased) -> DIResult<Self> {
        let value = view
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| DIError::type_mismatch(std::any::type_name::<T>()))?;
        Ok(Self {
            value,
            handle: Some(handle),
        })
    }
}

impl<T: ?Sized> Instance<T> {
    /// Shared pointer to the bean value; outlives the instance if kept
    pub fn value(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }

    pub fn definition(&self) -> Option<&BeanDefinition> {
        self.handle.as_deref().map(BeanInstance::definition)
    }

    pub fn scope(&self) -> Option<ScopeKind> {
        self.definition().map(BeanDefinition::scope)
    }

    /// Whether both instances wrap the same created bean
    pub fn same_instance(&self, other: &Instance<T>) -> bool {
        match (&self.handle, &other.handle) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Destroy a default-scoped instance now, surfacing destroy failures
    pub fn release(mut self) -> DIResult<()> {
        match self.handle.take() {
            Some(handle) => release_handle(&handle),
            None => Ok(()),
        }
    }
}

impl<T: ?Sized> Deref for Instance<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: ?Sized> Drop for Instance<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = release_handle(&handle) {
                warn!("Failed to release bean {}: {}", handle.definition().display_name(), e);
            }
        }
    }
}

impl<T: ?Sized> fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &std::any::type_name::<T>())
            .field("handle", &self.handle)
            .finish()
    }
}

/// Ordered beans returned by a collection lookup
pub struct Instances<T: ?Sized> {
    items: Vec<Instance<T>>,
}

impl<T: ?Sized> Instances<T> {
    pub(crate) fn new(items: Vec<Instance<T>>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instance<T>> {
        self.items.iter()
    }

    /// Shared pointers to every bean value, in order
    pub fn values(&self) -> Vec<Arc<T>> {
        self.items.iter().map(Instance::value).collect()
    }

    /// Release every element, attempting all of them before reporting
    pub fn release(self) -> DIResult<()> {
        let mut failures = Vec::new();
        for instance in self.items {
            if let Err(e) = instance.release() {
                failures.push(e);
            }
        }
        DIError::from_shutdown(failures)
    }
}

impl<T: ?Sized> IntoIterator for Instances<T> {
    type Item = Instance<T>;
    type IntoIter = std::vec::IntoIter<Instance<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T: ?Sized> IntoIterator for &'a Instances<T> {
    type Item = &'a Instance<T>;
    type IntoIter = std::slice::Iter<'a, Instance<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: ?Sized> fmt::Debug for Instances<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn handle_with_counter(
        sequence: u64,
        scope: ScopeKind,
        counter: Arc<AtomicUsize>,
    ) -> Arc<BeanInstance> {
        let definition = BeanDefinition::builder(|_| Ok(Arc::new(0u32)))
            .scope(scope)
            .on_destroy(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();
        let value: Erased = Arc::new(Arc::new(sequence as u32));
        Arc::new(BeanInstance::new(sequence, Arc::new(definition), value, Vec::new()))
    }

    #[test]
    fn test_destroy_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = handle_with_counter(0, ScopeKind::ApplicationScoped, counter.clone());

        assert!(handle.destroy().is_empty());
        assert!(handle.destroy().is_empty());
        assert!(handle.is_destroyed());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dependents_destroyed_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |sequence: u64| {
            let order = order.clone();
            let definition = BeanDefinition::builder(|_| Ok(Arc::new(0u64)))
                .on_destroy(move |value| {
                    order.lock().push(*value);
                    Ok(())
                })
                .build();
            let value: Erased = Arc::new(Arc::new(sequence));
            Arc::new(BeanInstance::new(sequence, Arc::new(definition), value, Vec::new()))
        };

        let base = make(1);
        let dependent = make(2);
        base.add_dependent(&dependent);

        assert!(base.destroy().is_empty());
        assert_eq!(*order.lock(), vec![2, 1]);
    }

    #[test]
    fn test_release_only_destroys_default_scoped() {
        let counter = Arc::new(AtomicUsize::new(0));

        let shared = handle_with_counter(0, ScopeKind::ApplicationScoped, counter.clone());
        let view = shared.value().clone();
        let instance = Instance::<u32>::from_view(shared.clone(), &view).unwrap();
        instance.release().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let fresh = handle_with_counter(1, ScopeKind::DefaultScoped, counter.clone());
        let view = fresh.value().clone();
        let instance = Instance::<u32>::from_view(fresh, &view).unwrap();
        assert_eq!(*instance, 1);
        drop(instance);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_destroy_is_reported() {
        let definition = BeanDefinition::builder(|_| Ok(Arc::new(0u32)))
            .on_destroy(|_| Err(anyhow::anyhow!("still busy")))
            .build();
        let value: Erased = Arc::new(Arc::new(0u32));
        let handle = Arc::new(BeanInstance::new(0, Arc::new(definition), value.clone(), Vec::new()));

        let instance = Instance::<u32>::from_view(handle, &value).unwrap();
        assert!(matches!(instance.release(), Err(DIError::DestroyFailed { .. })));
    }

    #[test]
    fn test_wrong_view_type() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = handle_with_counter(0, ScopeKind::ApplicationScoped, counter);
        let view = handle.value().clone();
        let result = Instance::<String>::from_view(handle, &view);
        assert!(matches!(result, Err(DIError::InvalidServiceType { .. })));
    }
}
