//! Typed filters and their execution contract.
//!
//! A [`Filter`] wraps one transformation with declared input and output
//! types and an optional host requirement. Every execution checks them in
//! a fixed order: host first (fatal), then input type, then output type.
//! Type mismatches are not errors; they produce "no output".
//!
//! The `M` parameter carries persistence metadata. Plain in-memory filters
//! use `()`; stored filters use [`Binding`] (see [`PersistableFilter`]).

use crate::composite::{self, CompositeMode};
use crate::context::ExecutionContext;
use crate::environment::{HostEnvironment, RuntimeEnvironment, UnsupportedRuntimeEnvironment};
use crate::group::{ContextId, FilterGroup, FilterId};
use crate::process::{FilterDecl, Process};
use crate::settings::{SettingError, SettingValue, Settings};
use crate::types::TypeDescription;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Errors from building or rearranging filters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("filter class '{0}' is not a composite and cannot hold children")]
    NotComposite(String),

    #[error("no child filter with sequence {0}")]
    NoSuchChild(u32),

    #[error(
        "filter '{filter}' has types {input} -> {output}, but group '{group}' declares {group_input} -> {group_output}"
    )]
    GroupMismatch {
        filter: String,
        group: String,
        input: TypeDescription,
        output: TypeDescription,
        group_input: TypeDescription,
        group_output: TypeDescription,
    },

    #[error("composite '{0}' must be bound before its children are added")]
    BindWithChildren(String),

    #[error("composite '{0}' has no sequence left after its last child")]
    SequenceExhausted(String),

    #[error(transparent)]
    Setting(#[from] SettingError),
}

/// What a filter runs: a processor, or a composite over child filters.
#[derive(Clone)]
pub enum Body<M> {
    Leaf(Arc<dyn Process>),
    Composite {
        mode: CompositeMode,
        children: Vec<Filter<M>>,
    },
}

impl<M: fmt::Debug> fmt::Debug for Body<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Leaf(process) => f.debug_tuple("Leaf").field(&process.decl().class).finish(),
            Body::Composite { mode, children } => f
                .debug_struct("Composite")
                .field("mode", mode)
                .field("children", children)
                .finish(),
        }
    }
}

/// A typed transformation.
#[derive(Debug, Clone)]
pub struct Filter<M = ()> {
    pub(crate) decl: Arc<FilterDecl>,
    /// Human-readable name, defaulting to the class's display name.
    pub display_name: String,
    /// Position among siblings. Zero means "not yet placed".
    pub sequence: u32,
    /// Host requirement checked before every execution.
    pub runtime: Option<RuntimeEnvironment>,
    pub(crate) input_type: TypeDescription,
    pub(crate) output_type: TypeDescription,
    pub(crate) settings: Settings,
    pub(crate) body: Body<M>,
    pub(crate) meta: M,
    pub(crate) errors: Vec<String>,
    pub(crate) last_input: Option<Value>,
    pub(crate) last_output: Option<Value>,
}

impl Filter<()> {
    /// Create a leaf filter around a processor.
    pub fn new(
        process: Arc<dyn Process>,
        input_type: TypeDescription,
        output_type: TypeDescription,
    ) -> Self {
        let decl = Arc::new(process.decl().clone());
        Self::with_body(decl, Body::Leaf(process), input_type, output_type, ())
    }

    /// Create an empty composite filter.
    pub fn composite(
        mode: CompositeMode,
        input_type: TypeDescription,
        output_type: TypeDescription,
    ) -> Self {
        let body = Body::Composite {
            mode,
            children: Vec::new(),
        };
        Self::with_body(Arc::new(mode.decl()), body, input_type, output_type, ())
    }

    /// Attach this filter to a group, making it persistable.
    ///
    /// The filter's types must equal the group's. Composites are bound
    /// while still empty; children are bound individually and added after.
    pub fn bind(
        self,
        group: Arc<FilterGroup>,
        context_id: ContextId,
    ) -> Result<PersistableFilter, FilterError> {
        if self.input_type != group.input_type || self.output_type != group.output_type {
            return Err(FilterError::GroupMismatch {
                filter: self.display_name,
                group: group.symbolic.clone(),
                input: self.input_type,
                output: self.output_type,
                group_input: group.input_type.clone(),
                group_output: group.output_type.clone(),
            });
        }

        let body = match self.body {
            Body::Leaf(process) => Body::Leaf(process),
            Body::Composite { mode, children } if children.is_empty() => Body::Composite {
                mode,
                children: Vec::new(),
            },
            Body::Composite { .. } => return Err(FilterError::BindWithChildren(self.display_name)),
        };

        Ok(Filter {
            decl: self.decl,
            display_name: self.display_name,
            sequence: self.sequence,
            runtime: self.runtime,
            input_type: self.input_type,
            output_type: self.output_type,
            settings: self.settings,
            body,
            meta: Binding::new(group, context_id),
            errors: self.errors,
            last_input: None,
            last_output: None,
        })
    }
}

impl<M> Filter<M> {
    pub(crate) fn with_body(
        decl: Arc<FilterDecl>,
        body: Body<M>,
        input_type: TypeDescription,
        output_type: TypeDescription,
        meta: M,
    ) -> Self {
        Self {
            display_name: decl.display_name.clone(),
            runtime: decl.runtime.clone(),
            decl,
            sequence: 0,
            input_type,
            output_type,
            settings: Settings::new(),
            body,
            meta,
            errors: Vec::new(),
            last_input: None,
            last_output: None,
        }
    }

    pub fn decl(&self) -> &FilterDecl {
        &self.decl
    }

    /// The registered class key.
    pub fn class(&self) -> &str {
        &self.decl.class
    }

    pub fn input_type(&self) -> &TypeDescription {
        &self.input_type
    }

    pub fn output_type(&self) -> &TypeDescription {
        &self.output_type
    }

    pub fn body(&self) -> &Body<M> {
        &self.body
    }

    pub fn meta(&self) -> &M {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut M {
        &mut self.meta
    }

    /// Builder-style display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Builder-style sequence.
    pub fn at(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    // ------------------------------------------------------------------
    // Type and environment checks
    // ------------------------------------------------------------------

    /// True if `input` (and `output`, when given) fit the declared types.
    pub fn supports(&self, input: &Value, output: Option<&Value>) -> bool {
        self.input_type.is_compatible(input)
            && output.is_none_or(|out| self.output_type.is_compatible(out))
    }

    /// True if this filter and every descendant can run on `host`.
    pub fn is_runtime_supported(&self, host: &HostEnvironment) -> bool {
        let own = self
            .runtime
            .as_ref()
            .is_none_or(|env| env.is_satisfied_by(host));
        own && self.filters().iter().all(|child| child.is_runtime_supported(host))
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Set one setting, rejecting names the class does not declare.
    pub fn set_setting(
        &mut self,
        name: impl Into<String>,
        value: impl Into<SettingValue>,
    ) -> Result<(), FilterError> {
        let name = name.into();
        let value = value.into();
        self.decl.validate_setting(&name, &value)?;
        if value.is_empty() {
            self.settings.remove(&name);
        } else {
            self.settings.insert(name, value);
        }
        Ok(())
    }

    /// Builder-style [`Filter::set_setting`].
    pub fn with_setting(
        mut self,
        name: impl Into<String>,
        value: impl Into<SettingValue>,
    ) -> Result<Self, FilterError> {
        self.set_setting(name, value)?;
        Ok(self)
    }

    /// Replace the settings bag, validating every entry.
    pub fn set_settings(&mut self, settings: Settings) -> Result<(), FilterError> {
        for (name, value) in settings.iter() {
            self.decl.validate_setting(name, value)?;
        }
        self.settings = settings
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        Ok(())
    }

    pub fn remove_setting(&mut self, name: &str) -> Option<SettingValue> {
        self.settings.remove(name)
    }

    /// Check required settings on this filter and all descendants.
    pub fn validate(&self) -> Result<(), FilterError> {
        self.decl.validate_settings(&self.settings)?;
        for child in self.filters() {
            child.validate()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Errors and last run
    // ------------------------------------------------------------------

    /// Record a non-fatal error.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Input accepted by the most recent execution.
    pub fn last_input(&self) -> Option<&Value> {
        self.last_input.as_ref()
    }

    /// Output produced by the most recent execution.
    pub fn last_output(&self) -> Option<&Value> {
        self.last_output.as_ref()
    }

    // ------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------

    pub fn is_composite(&self) -> bool {
        matches!(self.body, Body::Composite { .. })
    }

    pub fn composite_mode(&self) -> Option<CompositeMode> {
        match &self.body {
            Body::Composite { mode, .. } => Some(*mode),
            Body::Leaf(_) => None,
        }
    }

    /// Children in sequence order. Empty for leaves.
    pub fn filters(&self) -> &[Filter<M>] {
        match &self.body {
            Body::Composite { children, .. } => children,
            Body::Leaf(_) => &[],
        }
    }

    /// Mutable children. Sequence numbers must not be changed through this.
    pub fn filters_mut(&mut self) -> &mut [Filter<M>] {
        match &mut self.body {
            Body::Composite { children, .. } => children,
            Body::Leaf(_) => &mut [],
        }
    }

    fn children_mut(&mut self) -> Result<&mut Vec<Filter<M>>, FilterError> {
        match &mut self.body {
            Body::Composite { children, .. } => Ok(children),
            Body::Leaf(_) => Err(FilterError::NotComposite(self.decl.class.clone())),
        }
    }

    /// Add a child, returning its sequence.
    ///
    /// A non-zero sequence not used by a sibling is kept; otherwise the
    /// child goes after the current last child.
    pub fn add_filter(&mut self, mut child: Filter<M>) -> Result<u32, FilterError> {
        let class = self.decl.class.clone();
        let children = self.children_mut()?;
        let taken = children.iter().any(|c| c.sequence == child.sequence);
        if child.sequence == 0 || taken {
            child.sequence = children
                .iter()
                .map(|c| c.sequence)
                .max()
                .unwrap_or(0)
                .checked_add(1)
                .ok_or(FilterError::SequenceExhausted(class))?;
        }

        let seq = child.sequence;
        let pos = children.partition_point(|c| c.sequence < seq);
        children.insert(pos, child);
        Ok(seq)
    }

    pub fn filter_by_seq(&self, seq: u32) -> Option<&Filter<M>> {
        self.filters().iter().find(|c| c.sequence == seq)
    }

    pub fn filter_by_seq_mut(&mut self, seq: u32) -> Option<&mut Filter<M>> {
        self.filters_mut().iter_mut().find(|c| c.sequence == seq)
    }

    /// Swap in a child at the replacement's sequence, returning the old one.
    pub fn replace_filter(&mut self, child: Filter<M>) -> Result<Filter<M>, FilterError> {
        let seq = child.sequence;
        let children = self.children_mut()?;
        let slot = children
            .iter_mut()
            .find(|c| c.sequence == seq)
            .ok_or(FilterError::NoSuchChild(seq))?;
        Ok(std::mem::replace(slot, child))
    }

    /// Remove the child at `seq`.
    pub fn remove_filter(&mut self, seq: u32) -> Option<Filter<M>> {
        let children = self.children_mut().ok()?;
        let pos = children.iter().position(|c| c.sequence == seq)?;
        Some(children.remove(pos))
    }

    /// Visit this filter and its descendants depth-first, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Filter<M>)) {
        visit(self);
        for child in self.filters() {
            child.walk(visit);
        }
    }
}

impl<M: Send> Filter<M> {
    /// Run the filter once.
    ///
    /// Returns `Err` only when this filter or a descendant cannot run on
    /// the context's host. `Ok(None)` means the input or output did not
    /// match the declared types, or the transformation produced nothing.
    pub fn execute(
        &mut self,
        ctx: &ExecutionContext,
        input: Value,
    ) -> Result<Option<Value>, UnsupportedRuntimeEnvironment> {
        self.last_input = None;
        self.last_output = None;

        if let Some(env) = &self.runtime
            && let Err(reason) = env.check(&ctx.host)
        {
            tracing::warn!(filter = %self.display_name, %reason, "unsupported runtime environment");
            return Err(UnsupportedRuntimeEnvironment {
                filter: self.display_name.clone(),
                reason,
            });
        }

        if !self.input_type.is_compatible(&input) {
            tracing::debug!(
                filter = %self.display_name,
                expected = %self.input_type,
                got = input.kind(),
                "input rejected"
            );
            return Ok(None);
        }

        self.last_input = Some(input.clone());

        let output = match &mut self.body {
            Body::Leaf(process) => process.process(input, &self.settings, ctx, &mut self.errors),
            Body::Composite { mode, children } => {
                composite::run(*mode, children, input, ctx, &mut self.errors)?
            }
        };

        match output {
            Some(output) if self.output_type.is_compatible(&output) => {
                self.last_output = Some(output.clone());
                Ok(Some(output))
            }
            Some(output) => {
                tracing::debug!(
                    filter = %self.display_name,
                    expected = %self.output_type,
                    got = output.kind(),
                    "output rejected"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// Persistable filters
// ============================================================================

/// Persistence metadata of a stored (or storable) filter.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Set once the filter has been inserted.
    pub id: Option<FilterId>,
    pub group: Arc<FilterGroup>,
    pub context_id: ContextId,
    pub parent_id: Option<FilterId>,
    pub is_template: bool,
}

impl Binding {
    pub fn new(group: Arc<FilterGroup>, context_id: ContextId) -> Self {
        Self {
            id: None,
            group,
            context_id,
            parent_id: None,
            is_template: false,
        }
    }
}

/// A filter with identity, group and tree position.
pub type PersistableFilter = Filter<Binding>;

impl Filter<Binding> {
    pub fn id(&self) -> Option<FilterId> {
        self.meta.id
    }

    pub fn group(&self) -> &Arc<FilterGroup> {
        &self.meta.group
    }

    pub fn context_id(&self) -> ContextId {
        self.meta.context_id
    }

    pub fn parent_id(&self) -> Option<FilterId> {
        self.meta.parent_id
    }

    pub fn is_template(&self) -> bool {
        self.meta.is_template
    }

    /// Builder-style template flag.
    pub fn template(mut self, is_template: bool) -> Self {
        self.meta.is_template = is_template;
        self
    }
}
