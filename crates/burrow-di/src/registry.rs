//! Append-only index of bean definitions
//!
//! Definitions are grouped by every type they are assignable to. Each group
//! is kept sorted by descending priority, then by registration order, so
//! single lookups take the first match and collection lookups iterate the
//! group as-is.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::container::ContainerState;
use crate::definition::{BeanDefinition, BeanId, TypeKey};
use crate::error::{DIError, DIResult};

/// A definition reachable under a given type, with the index of the view
/// converting its value to that type
#[derive(Clone)]
pub(crate) struct Candidate {
    pub(crate) definition: Arc<BeanDefinition>,
    pub(crate) view: usize,
}

/// Index of registered bean definitions
#[derive(Default)]
pub struct Registry {
    definitions: Vec<Arc<BeanDefinition>>,
    by_type: HashMap<TypeKey, Vec<Candidate>>,
    frozen: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition, assigning its [`BeanId`]
    pub fn register(&mut self, mut definition: BeanDefinition) -> DIResult<BeanId> {
        if self.frozen {
            return Err(DIError::InvalidState {
                operation: "register a bean",
                state: ContainerState::Started,
            });
        }

        let id = BeanId(self.definitions.len());
        definition.id = id;
        let definition = Arc::new(definition);

        for (view, key) in definition.assignable_types().enumerate() {
            let bucket = self.by_type.entry(*key).or_default();
            // Keep equal priorities in registration order
            let position = bucket.partition_point(|c| c.definition.priority() >= definition.priority());
            bucket.insert(
                position,
                Candidate {
                    definition: Arc::clone(&definition),
                    view,
                },
            );
        }

        debug!(
            "Registered bean {} (scope: {}, priority: {})",
            definition.display_name(),
            definition.scope(),
            definition.priority()
        );
        self.definitions.push(definition);
        Ok(id)
    }

    /// Reject any further registration
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Highest-priority definition assignable to `key`. With a qualifier,
    /// only definitions carrying exactly that qualifier match.
    pub fn resolve_one(&self, key: &TypeKey, qualifier: Option<&str>) -> Option<&BeanDefinition> {
        self.candidate(key, qualifier).map(|c| c.definition.as_ref())
    }

    /// Every definition assignable to `key`, in priority then registration order
    pub fn resolve_all(&self, key: &TypeKey) -> impl Iterator<Item = &BeanDefinition> {
        self.candidates(key).iter().map(|c| c.definition.as_ref())
    }

    pub(crate) fn candidate(&self, key: &TypeKey, qualifier: Option<&str>) -> Option<&Candidate> {
        self.candidates(key)
            .iter()
            .find(|c| qualifier.map_or(true, |q| c.definition.qualifier() == Some(q)))
    }

    pub(crate) fn candidates(&self, key: &TypeKey) -> &[Candidate] {
        self.by_type.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.by_type.contains_key(key)
    }

    pub fn get(&self, id: BeanId) -> Option<&Arc<BeanDefinition>> {
        self.definitions.get(id.index())
    }

    /// All definitions in registration order
    pub fn definitions(&self) -> &[Arc<BeanDefinition>] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
