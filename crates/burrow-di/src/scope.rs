//! Scopes decide when a definition's factory runs and who owns the result
//!
//! The container ships two scopes. [`ApplicationScope`] keeps one instance
//! per definition for the container's lifetime. [`DefaultScope`] creates a
//! fresh instance on every request and leaves ownership with the caller.
//! Further scopes implement [`Scope`] and are registered on the container
//! under the name used in [`ScopeKind::Custom`](crate::ScopeKind::Custom).

use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use tracing::debug;

use crate::definition::BeanDefinition;
use crate::error::{DIError, DIResult};
use crate::instance::BeanInstance;

/// Creates a new instance of the definition when called
pub type Creator<'a> = dyn FnMut() -> DIResult<Arc<BeanInstance>> + 'a;

/// Policy object controlling instance reuse for the beans bound to it
pub trait Scope: Send + Sync {
    /// Name used in logs and in [`ScopeKind::Custom`](crate::ScopeKind::Custom)
    fn name(&self) -> &str;

    /// An existing instance that can be handed out without creating anything
    fn cached(&self, _definition: &BeanDefinition) -> Option<Arc<BeanInstance>> {
        None
    }

    /// Return the instance for `definition`, calling `create` when the scope
    /// has none to reuse
    fn get_or_create(
        &self,
        definition: &BeanDefinition,
        create: &mut Creator<'_>,
    ) -> DIResult<Arc<BeanInstance>>;

    /// Drop every instance this scope retains. Destroy hooks have already run
    /// by the time the container calls this; failures here are reported
    /// alongside them.
    fn release(&self) -> Vec<DIError> {
        Vec::new()
    }
}

type Slot = RwLock<Option<Arc<BeanInstance>>>;

/// One shared instance per definition
///
/// Slots are allocated when the container starts, one per definition, and
/// read without blocking once filled. Creation is serialized scope-wide by a
/// reentrant lock: a factory may look up further application beans on its
/// own thread, while other threads wait before touching any slot. Two threads
/// can therefore never hold halves of the same cycle, and the thread that
/// does walk it reports the cycle.
pub struct ApplicationScope {
    slots: Vec<Slot>,
    creating: ReentrantMutex<()>,
}

impl ApplicationScope {
    pub fn new(definitions: usize) -> Self {
        Self {
            slots: (0..definitions).map(|_| RwLock::new(None)).collect(),
            creating: ReentrantMutex::new(()),
        }
    }

    fn slot(&self, definition: &BeanDefinition) -> DIResult<&Slot> {
        self.slots
            .get(definition.id().index())
            .ok_or_else(|| DIError::InvalidServiceType {
                message: format!("bean {} is not registered in this container", definition.display_name()),
            })
    }

    /// Number of instances created so far
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.read().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Scope for ApplicationScope {
    fn name(&self) -> &str {
        "application"
    }

    fn cached(&self, definition: &BeanDefinition) -> Option<Arc<BeanInstance>> {
        self.slots.get(definition.id().index())?.read().clone()
    }

    fn get_or_create(
        &self,
        definition: &BeanDefinition,
        create: &mut Creator<'_>,
    ) -> DIResult<Arc<BeanInstance>> {
        let slot = self.slot(definition)?;
        if let Some(existing) = slot.read().clone() {
            return Ok(existing);
        }

        let _creating = self.creating.lock();
        // Another thread may have finished while we waited
        if let Some(existing) = slot.read().clone() {
            return Ok(existing);
        }

        let instance = create()?;
        *slot.write() = Some(Arc::clone(&instance));
        debug!("Cached application-scoped bean {}", definition.display_name());
        Ok(instance)
    }

    fn release(&self) -> Vec<DIError> {
        for slot in &self.slots {
            slot.write().take();
        }
        Vec::new()
    }
}

/// A fresh instance on every request
#[derive(Debug, Default)]
pub struct DefaultScope;

impl Scope for DefaultScope {
    fn name(&self) -> &str {
        "default"
    }

    fn get_or_create(
        &self,
        _definition: &BeanDefinition,
        create: &mut Creator<'_>,
    ) -> DIResult<Arc<BeanInstance>> {
        create()
    }
}
