//! Bean definitions
//!
//! A [`BeanDefinition`] is the immutable recipe for one producible type:
//! its public type (plus any other types it is assignable to), scope,
//! priority, declared dependencies, factory and lifecycle hooks. The
//! dependency list is declared up front by the caller, so the runtime only
//! interprets metadata and never needs reflection.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::BeanContext;

/// Priority assigned when none is given
pub const DEFAULT_PRIORITY: i32 = 1000;

/// Type-erased bean value. Always holds an `Arc<T>` for the bean's type.
pub(crate) type Erased = Arc<dyn Any + Send + Sync>;

type ErasedFactory = Box<dyn Fn(&mut BeanContext<'_>) -> anyhow::Result<Erased> + Send + Sync>;
type ErasedHook = Box<dyn Fn(&Erased) -> anyhow::Result<()> + Send + Sync>;
type Caster = Box<dyn Fn(&Erased) -> Option<Erased> + Send + Sync>;

/// Identity of a public type, including unsized ones such as `dyn Trait`
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Registration index of a definition inside its container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeanId(pub(crate) usize);

impl BeanId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Lifetime policy of a bean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// One instance per container, created on first lookup
    ApplicationScoped,
    /// A fresh instance per lookup, released by its holder or by `close()`
    DefaultScoped,
    /// A scope registered on the container under this name
    Custom(&'static str),
}

impl ScopeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScopeKind::ApplicationScoped => "application",
            ScopeKind::DefaultScoped => "default",
            ScopeKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How many beans a dependency expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one (highest priority wins); `NotFound` if none
    One,
    /// Zero or one; absent when nothing is registered
    Optional,
    /// Every assignable bean, in priority order
    All,
}

/// A declared dependency of a bean
#[derive(Debug, Clone)]
pub struct Dependency {
    pub(crate) key: TypeKey,
    pub(crate) qualifier: Option<String>,
    pub(crate) cardinality: Cardinality,
}

impl Dependency {
    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

/// One type a bean can be looked up as, with the conversion from the
/// stored value
pub(crate) struct TypeView {
    pub(crate) key: TypeKey,
    cast: Option<Caster>,
}

impl TypeView {
    pub(crate) fn cast(&self, value: &Erased) -> Option<Erased> {
        match &self.cast {
            Some(cast) => cast(value),
            None => Some(Arc::clone(value)),
        }
    }
}

/// Immutable metadata describing one producible bean
pub struct BeanDefinition {
    pub(crate) id: BeanId,
    scope: ScopeKind,
    priority: i32,
    qualifier: Option<String>,
    eager: bool,
    dependencies: Vec<Dependency>,
    views: Vec<TypeView>,
    metadata: BTreeMap<String, String>,
    factory: ErasedFactory,
    init: Option<ErasedHook>,
    destroy: Option<ErasedHook>,
}

impl BeanDefinition {
    /// Start a definition for `T` produced by `factory`.
    ///
    /// The factory receives a [`BeanContext`] giving access to the declared
    /// dependencies and to the container. Defaults: `DefaultScoped`,
    /// priority [`DEFAULT_PRIORITY`], no qualifier, lazy.
    pub fn builder<T, F>(factory: F) -> BeanDefinitionBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&mut BeanContext<'_>) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        BeanDefinitionBuilder {
            definition: BeanDefinition {
                id: BeanId(0),
                scope: ScopeKind::DefaultScoped,
                priority: DEFAULT_PRIORITY,
                qualifier: None,
                eager: false,
                dependencies: Vec::new(),
                views: vec![TypeView {
                    key: TypeKey::of::<T>(),
                    cast: None,
                }],
                metadata: BTreeMap::new(),
                factory: Box::new(move |ctx: &mut BeanContext<'_>| {
                    Ok(Arc::new(factory(ctx)?) as Erased)
                }),
                init: None,
                destroy: None,
            },
            _type: PhantomData,
        }
    }

    /// An already-built value, shared as an application-scoped bean
    pub fn provided<T>(value: Arc<T>) -> BeanDefinitionBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self::builder(move |_| Ok(Arc::clone(&value))).scope(ScopeKind::ApplicationScoped)
    }

    /// A bean built by a supplier with no dependencies
    pub fn supplier<T, F>(scope: ScopeKind, supplier: F) -> BeanDefinitionBuilder<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        Self::builder(move |_| supplier()).scope(scope)
    }

    pub fn id(&self) -> BeanId {
        self.id
    }

    /// The type this bean was defined for
    pub fn public_type(&self) -> &TypeKey {
        // views[0] is always the public type
        &self.views[0].key
    }

    /// Every type this bean can be looked up as, public type first
    pub fn assignable_types(&self) -> impl Iterator<Item = &TypeKey> {
        self.views.iter().map(|view| &view.key)
    }

    pub fn scope(&self) -> ScopeKind {
        self.scope
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn is_eager(&self) -> bool {
        self.eager
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Type name plus qualifier, used in logs and errors
    pub fn display_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}[{}]", self.public_type().name(), q),
            None => self.public_type().name().to_string(),
        }
    }

    pub(crate) fn views(&self) -> &[TypeView] {
        &self.views
    }

    pub(crate) fn create(&self, ctx: &mut BeanContext<'_>) -> anyhow::Result<Erased> {
        (self.factory)(ctx)
    }

    pub(crate) fn run_init(&self, value: &Erased) -> anyhow::Result<()> {
        match &self.init {
            Some(hook) => hook(value),
            None => Ok(()),
        }
    }

    pub(crate) fn has_destroy_hook(&self) -> bool {
        self.destroy.is_some()
    }

    pub(crate) fn run_destroy(&self, value: &Erased) -> anyhow::Result<()> {
        match &self.destroy {
            Some(hook) => hook(value),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("id", &self.id)
            .field("type", self.public_type())
            .field("scope", &self.scope)
            .field("priority", &self.priority)
            .field("qualifier", &self.qualifier)
            .field("eager", &self.eager)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for a [`BeanDefinition`] of type `T`
pub struct BeanDefinitionBuilder<T: ?Sized> {
    definition: BeanDefinition,
    _type: PhantomData<fn(&T)>,
}

impl<T> BeanDefinitionBuilder<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub fn scope(mut self, scope: ScopeKind) -> Self {
        self.definition.scope = scope;
        self
    }

    /// Shorthand for `scope(ScopeKind::ApplicationScoped)`
    pub fn application_scoped(self) -> Self {
        self.scope(ScopeKind::ApplicationScoped)
    }

    /// Higher priority wins single lookups and comes first in collections
    pub fn priority(mut self, priority: i32) -> Self {
        self.definition.priority = priority;
        self
    }

    pub fn qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.definition.qualifier = Some(qualifier.into());
        self
    }

    /// Instantiate at `start()` (application-scoped beans only)
    pub fn eager(mut self) -> Self {
        self.definition.eager = true;
        self
    }

    pub fn depends_on<D: ?Sized + 'static>(self) -> Self {
        self.dependency::<D>(None, Cardinality::One)
    }

    pub fn depends_on_qualified<D: ?Sized + 'static>(self, qualifier: impl Into<String>) -> Self {
        self.dependency::<D>(Some(qualifier.into()), Cardinality::One)
    }

    pub fn depends_on_optional<D: ?Sized + 'static>(self) -> Self {
        self.dependency::<D>(None, Cardinality::Optional)
    }

    pub fn depends_on_all<D: ?Sized + 'static>(self) -> Self {
        self.dependency::<D>(None, Cardinality::All)
    }

    fn dependency<D: ?Sized + 'static>(
        mut self,
        qualifier: Option<String>,
        cardinality: Cardinality,
    ) -> Self {
        self.definition.dependencies.push(Dependency {
            key: TypeKey::of::<D>(),
            qualifier,
            cardinality,
        });
        self
    }

    /// Make the bean assignable to `I` as well, e.g.
    /// `.expose::<dyn Awaiter>(|server| server as Arc<dyn Awaiter>)`
    pub fn expose<I>(mut self, cast: impl Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let key = TypeKey::of::<I>();
        if self.definition.views.iter().any(|view| view.key == key) {
            return self;
        }
        self.definition.views.push(TypeView {
            key,
            cast: Some(Box::new(move |value: &Erased| {
                value
                    .downcast_ref::<Arc<T>>()
                    .map(|typed| Arc::new(cast(Arc::clone(typed))) as Erased)
            })),
        });
        self
    }

    /// Runs right after the factory; a failure discards the new value
    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.init = Some(typed_hook::<T, F>(hook));
        self
    }

    /// Runs at most once, when the instance is released or the container closes
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.destroy = Some(typed_hook::<T, F>(hook));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.definition.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> BeanDefinition {
        self.definition
    }
}

impl<T> From<BeanDefinitionBuilder<T>> for BeanDefinition
where
    T: ?Sized + Send + Sync + 'static,
{
    fn from(builder: BeanDefinitionBuilder<T>) -> Self {
        builder.build()
    }
}

fn typed_hook<T, F>(hook: F) -> ErasedHook
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Box::new(move |value: &Erased| match value.downcast_ref::<Arc<T>>() {
        Some(typed) => hook(typed.as_ref()),
        None => Err(anyhow::anyhow!(
            "lifecycle hook expected {}",
            std::any::type_name::<T>()
        )),
    })
}
