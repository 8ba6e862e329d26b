//! Access to dependencies from inside a factory

use std::sync::Arc;

use crate::container::Container;
use crate::definition::{BeanDefinition, Cardinality, TypeKey};
use crate::error::{DIError, DIResult};
use crate::instance::BeanInstance;
use crate::resolver::{Bound, Resolved, Resolver};

/// Handed to a bean's factory while it runs
///
/// Declared dependencies were resolved before the factory was called and are
/// read back with [`get`](Self::get), [`optional`](Self::optional) and
/// [`all`](Self::all). Asking for a type that was not declared falls back to
/// a dynamic lookup, which is still checked for cycles and recorded so the
/// new bean is torn down before whatever it looked up.
pub struct BeanContext<'a> {
    resolver: &'a Resolver<'a>,
    definition: &'a BeanDefinition,
    dependencies: &'a [Resolved],
    collected: Vec<Arc<BeanInstance>>,
}

impl<'a> BeanContext<'a> {
    pub(crate) fn new(
        resolver: &'a Resolver<'a>,
        definition: &'a BeanDefinition,
        dependencies: &'a [Resolved],
    ) -> Self {
        Self {
            resolver,
            definition,
            dependencies,
            collected: Vec::new(),
        }
    }

    /// The container creating this bean
    pub fn container(&self) -> &Container {
        self.resolver.container()
    }

    /// The definition being instantiated
    pub fn definition(&self) -> &BeanDefinition {
        self.definition
    }

    /// The highest-priority `D`
    pub fn get<D: ?Sized + 'static>(&mut self) -> DIResult<Arc<D>> {
        self.single::<D>(None)
    }

    /// The highest-priority `D` carrying `qualifier`
    pub fn get_qualified<D: ?Sized + 'static>(&mut self, qualifier: &str) -> DIResult<Arc<D>> {
        self.single::<D>(Some(qualifier))
    }

    /// The highest-priority `D`, or `None` when no `D` is registered
    pub fn optional<D: ?Sized + 'static>(&mut self) -> DIResult<Option<Arc<D>>> {
        let key = TypeKey::of::<D>();
        if let Some(index) = self.declared(&key, None, &[Cardinality::Optional, Cardinality::One]) {
            return match &self.dependencies[index] {
                Resolved::One(bound) => downcast::<D>(bound).map(Some),
                _ => Ok(None),
            };
        }

        match self.resolver.resolve_optional(&key, None)? {
            Some(bound) => {
                let value = downcast::<D>(&bound)?;
                self.collected.push(bound.handle);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Every `D`, in priority then registration order
    pub fn all<D: ?Sized + 'static>(&mut self) -> DIResult<Vec<Arc<D>>> {
        let key = TypeKey::of::<D>();
        if let Some(index) = self.declared(&key, None, &[Cardinality::All]) {
            return match &self.dependencies[index] {
                Resolved::All(bound) => bound.iter().map(downcast::<D>).collect(),
                _ => Ok(Vec::new()),
            };
        }
        self.lookups::<D>()
    }

    /// Dynamic single lookup, bypassing the declared dependencies
    pub fn lookup<D: ?Sized + 'static>(&mut self) -> DIResult<Arc<D>> {
        let bound = self.resolver.resolve_one(&TypeKey::of::<D>(), None)?;
        self.keep(bound)
    }

    /// Dynamic collection lookup, bypassing the declared dependencies
    pub fn lookups<D: ?Sized + 'static>(&mut self) -> DIResult<Vec<Arc<D>>> {
        let bound = self.resolver.resolve_all(&TypeKey::of::<D>())?;
        bound.into_iter().map(|b| self.keep(b)).collect()
    }

    fn single<D: ?Sized + 'static>(&mut self, qualifier: Option<&str>) -> DIResult<Arc<D>> {
        let key = TypeKey::of::<D>();
        if let Some(index) = self.declared(&key, qualifier, &[Cardinality::One]) {
            return match &self.dependencies[index] {
                Resolved::One(bound) => downcast::<D>(bound),
                _ => Err(DIError::not_found(&key, qualifier)),
            };
        }

        let bound = self.resolver.resolve_one(&key, qualifier)?;
        self.keep(bound)
    }

    fn declared(&self, key: &TypeKey, qualifier: Option<&str>, accepted: &[Cardinality]) -> Option<usize> {
        self.definition.dependencies().iter().position(|dependency| {
            dependency.key() == key
                && dependency.qualifier() == qualifier
                && accepted.contains(&dependency.cardinality())
        })
    }

    fn keep<D: ?Sized + 'static>(&mut self, bound: Bound) -> DIResult<Arc<D>> {
        let value = downcast::<D>(&bound);
        self.collected.push(bound.handle);
        value
    }

    pub(crate) fn into_collected(self) -> Vec<Arc<BeanInstance>> {
        self.collected
    }
}

fn downcast<D: ?Sized + 'static>(bound: &Bound) -> DIResult<Arc<D>> {
    bound
        .view
        .downcast_ref::<Arc<D>>()
        .cloned()
        .ok_or_else(|| DIError::type_mismatch(std::any::type_name::<D>()))
}
