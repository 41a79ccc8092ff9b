//! Registry of filter classes.

use crate::composite::CompositeMode;
use crate::filter::{Binding, Body, Filter, PersistableFilter};
use crate::group::{ContextId, FilterGroup};
use crate::process::{FilterDecl, Process};
use crate::types::TypeDescription;
use indexmap::IndexMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown filter class '{0}'")]
    UnknownClass(String),
}

/// Registry of available filter classes.
///
/// Maps the class keys stored with persisted filters back to code. The
/// composite classes are always present; everything else is registered at
/// startup, usually through a crate's `register_all`.
#[derive(Clone)]
pub struct FilterRegistry {
    /// Declarations indexed by class key.
    declarations: IndexMap<String, Arc<FilterDecl>>,
    /// Processors indexed by class key. Composites have none.
    implementations: IndexMap<String, Arc<dyn Process>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterRegistry {
    /// Create a registry holding only the composite classes.
    pub fn new() -> Self {
        let mut registry = Self {
            declarations: IndexMap::new(),
            implementations: IndexMap::new(),
        };
        for mode in [CompositeMode::Sequence, CompositeMode::Multiplex] {
            registry
                .declarations
                .insert(mode.class().to_string(), Arc::new(mode.decl()));
        }
        registry
    }

    /// Register a filter class with its implementation.
    ///
    /// Registering the same class key again replaces the earlier entry.
    pub fn register(&mut self, process: impl Process + 'static) {
        let decl = Arc::new(process.decl().clone());
        let class = decl.class.clone();
        tracing::trace!(class = %class, "registered filter class");
        self.declarations.insert(class.clone(), decl);
        self.implementations.insert(class, Arc::new(process));
    }

    pub fn get_decl(&self, class: &str) -> Option<&FilterDecl> {
        self.declarations.get(class).map(Arc::as_ref)
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn Process>> {
        self.implementations.get(class).cloned()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.declarations.contains_key(class)
    }

    /// Iterate over all declarations in registration order.
    pub fn declarations(&self) -> impl Iterator<Item = &FilterDecl> {
        self.declarations.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    fn body<M>(&self, class: &str) -> Result<(Arc<FilterDecl>, Body<M>), RegistryError> {
        let decl = self
            .declarations
            .get(class)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownClass(class.to_string()))?;

        let body = match (decl.composite_mode(), self.implementations.get(class)) {
            (Some(mode), _) => Body::Composite {
                mode,
                children: Vec::new(),
            },
            (None, Some(process)) => Body::Leaf(process.clone()),
            (None, None) => return Err(RegistryError::UnknownClass(class.to_string())),
        };
        Ok((decl, body))
    }

    /// Instantiate an in-memory filter of a registered class.
    pub fn create(
        &self,
        class: &str,
        input_type: TypeDescription,
        output_type: TypeDescription,
    ) -> Result<Filter, RegistryError> {
        let (decl, body) = self.body(class)?;
        Ok(Filter::with_body(decl, body, input_type, output_type, ()))
    }

    /// Instantiate a persistable filter in `group`, taking the group's types.
    pub fn create_in_group(
        &self,
        class: &str,
        group: Arc<FilterGroup>,
        context_id: ContextId,
    ) -> Result<PersistableFilter, RegistryError> {
        let (decl, body) = self.body(class)?;
        let input_type = group.input_type.clone();
        let output_type = group.output_type.clone();
        Ok(Filter::with_body(
            decl,
            body,
            input_type,
            output_type,
            Binding::new(group, context_id),
        ))
    }
}
